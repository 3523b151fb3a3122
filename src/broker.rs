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

use crate::error::ConsumerError;
use crate::message::{Message, Partition};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// Everything a broker client needs to open a connection to one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub brokers: Vec<String>,
    pub topic: String,
    pub partition: u32,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub read_backoff_min: Duration,
}

/// The broker-side contract the consumer depends on.
///
/// The wire protocol, connection pooling and fetch mechanics live behind this trait.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Queries a single broker address for the partitions of `topic`.
    async fn list_partitions(
        &self,
        address: &str,
        topic: &str,
        timeout: Duration,
    ) -> Result<Vec<Partition>, ConsumerError>;

    /// Opens a new connection to the leader of the configured partition.
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn BrokerConnection>, ConsumerError>;
}

/// A connection bound to a single partition, owned by exactly one worker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnection: Send + 'static {
    /// Waits for the next message, or fails.
    async fn fetch_next(&mut self) -> Result<Message, ConsumerError>;

    /// Moves the read position just past the last message currently in the partition.
    async fn seek_to_newest(&mut self) -> Result<(), ConsumerError>;

    async fn close(&mut self) -> Result<(), ConsumerError>;
}
