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

//! Common imports for users of the crate.
//!
//! ```
//! use topic_consumer::prelude::*;
//! ```

pub use crate::broker::{BrokerClient, BrokerConnection, ConnectionSettings};
pub use crate::catalog::{lookup_partitions, LOOKUP_TIMEOUT};
pub use crate::config::{
    ConsumerConfig, DEFAULT_RECOVER_DELAY, DEFAULT_RETRY_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT,
    MAX_BYTES, MIN_BYTES, READ_BACKOFF_MIN,
};
pub use crate::consumer::TopicConsumer;
pub use crate::error::ConsumerError;
pub use crate::handler::{HandlerFuture, LogMessageHandler, MessageHandler};
pub use crate::memory::MemoryBroker;
pub use crate::message::{BrokerInfo, Message, Partition};
pub use crate::settings::ConsumerSettings;
pub use crate::stats::{PartitionSnapshot, WorkerState};
