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

use bytes::Bytes;
use chrono::{DateTime, Utc};
use derive_more::Display;

/// A broker node as reported by the partition metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display("{id}@{host}:{port}")]
pub struct BrokerInfo {
    pub id: i32,
    pub host: String,
    pub port: u16,
    pub rack: Option<String>,
}

impl BrokerInfo {
    pub fn new(id: i32, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            rack: None,
        }
    }

    /// The `host:port` form used to dial the broker.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One partition of a topic, immutable once resolved by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub topic: String,
    pub id: u32,
    pub leader: BrokerInfo,
    pub replicas: Vec<BrokerInfo>,
    pub isr: Vec<BrokerInfo>,
}

impl Partition {
    pub fn new(topic: impl Into<String>, id: u32, leader: BrokerInfo) -> Self {
        Self {
            topic: topic.into(),
            id,
            replicas: vec![leader.clone()],
            isr: vec![leader.clone()],
            leader,
        }
    }
}

/// A message fetched from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        offset: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value: value.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }
}
