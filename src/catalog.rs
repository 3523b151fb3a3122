/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use crate::broker::BrokerClient;
use crate::error::ConsumerError;
use crate::message::Partition;
use std::time::Duration;
use tracing::{debug, error};

/// Timeout of a single partition metadata query.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolves the partitions of `topic` by asking each broker address in order.
///
/// The first address that answers wins, its view of the topic is returned as is.
/// Failures of individual addresses are logged, if every address fails the caller
/// gets [`ConsumerError::NoPartitionFound`].
pub async fn lookup_partitions(
    client: &dyn BrokerClient,
    brokers: &[String],
    topic: &str,
    timeout: Duration,
) -> Result<Vec<Partition>, ConsumerError> {
    for address in brokers {
        match lookup_partitions_at(client, address, topic, timeout).await {
            Ok(partitions) => {
                debug!(
                    "Found {} partition(s) for topic: {topic} at: {address}",
                    partitions.len()
                );
                return Ok(partitions);
            }
            Err(error) => {
                error!(%error, address, topic, "Partition lookup failed");
            }
        }
    }

    Err(ConsumerError::NoPartitionFound)
}

async fn lookup_partitions_at(
    client: &dyn BrokerClient,
    address: &str,
    topic: &str,
    timeout: Duration,
) -> Result<Vec<Partition>, ConsumerError> {
    match tokio::time::timeout(timeout, client.list_partitions(address, topic, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ConsumerError::LookupTimeout(address.to_owned())),
    }
}
