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

//! A fault-tolerant consumer of partitioned topics.
//!
//! [`TopicConsumer`] discovers the partitions of a topic through a [`BrokerClient`], runs one
//! [`PartitionWorker`](worker::PartitionWorker) task per partition and hands every message to a
//! [`MessageHandler`], in offset order within a partition. Broken connections are replaced
//! without involving the caller, at the newest offset of the partition.

pub mod broker;
pub mod catalog;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod memory;
pub mod message;
pub mod prelude;
pub mod settings;
pub mod stats;
pub mod worker;

pub use broker::{BrokerClient, BrokerConnection, ConnectionSettings};
pub use config::ConsumerConfig;
pub use consumer::TopicConsumer;
pub use error::ConsumerError;
pub use handler::{LogMessageHandler, MessageHandler};
pub use message::{BrokerInfo, Message, Partition};
