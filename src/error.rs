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

use strum::{EnumDiscriminants, IntoStaticStr};
use thiserror::Error;

/// The error type of the consumer.
///
/// Configuration and discovery errors are returned from
/// [`TopicConsumer::new`](crate::TopicConsumer::new).
/// Transport errors are produced by the broker client and are handled by the partition
/// workers themselves, they never reach the caller once the consumer is started.
#[derive(Clone, Debug, Error, EnumDiscriminants, IntoStaticStr, PartialEq, Eq)]
#[repr(u32)]
#[strum(serialize_all = "snake_case")]
#[strum_discriminants(
    vis(pub),
    derive(IntoStaticStr),
    strum(serialize_all = "snake_case")
)]
pub enum ConsumerError {
    #[error("No brokers")]
    NoBrokers = 1,
    #[error("No topic")]
    NoTopic = 2,
    #[error("No handler")]
    NoHandler = 3,
    #[error("Invalid settings: {0}")]
    InvalidSettings(String) = 4,
    #[error("Cannot read settings: {0}")]
    CannotReadSettings(String) = 5,
    #[error("No partition found")]
    NoPartitionFound = 20,
    #[error("Partition lookup timed out, address: {0}")]
    LookupTimeout(String) = 21,
    #[error("Unknown topic: {0}")]
    UnknownTopic(String) = 22,
    #[error("Cannot establish connection: {0}")]
    CannotEstablishConnection(String) = 40,
    #[error("Fetch failed: {0}")]
    FetchFailed(String) = 41,
    #[error("Seek failed: {0}")]
    SeekFailed(String) = 42,
    #[error("Disconnected")]
    Disconnected = 43,
    #[error("Consumer has already been started")]
    AlreadyStarted = 60,
    #[error("Consumer is closed")]
    ConsumerClosed = 61,
    #[error("Shutdown timed out, {0} partition worker(s) were aborted")]
    ShutdownTimedOut(usize) = 62,
}

impl ConsumerError {
    pub fn as_code(&self) -> u32 {
        match self {
            ConsumerError::NoBrokers => 1,
            ConsumerError::NoTopic => 2,
            ConsumerError::NoHandler => 3,
            ConsumerError::InvalidSettings(_) => 4,
            ConsumerError::CannotReadSettings(_) => 5,
            ConsumerError::NoPartitionFound => 20,
            ConsumerError::LookupTimeout(_) => 21,
            ConsumerError::UnknownTopic(_) => 22,
            ConsumerError::CannotEstablishConnection(_) => 40,
            ConsumerError::FetchFailed(_) => 41,
            ConsumerError::SeekFailed(_) => 42,
            ConsumerError::Disconnected => 43,
            ConsumerError::AlreadyStarted => 60,
            ConsumerError::ConsumerClosed => 61,
            ConsumerError::ShutdownTimedOut(_) => 62,
        }
    }

    pub fn as_string(&self) -> &'static str {
        self.into()
    }

    /// Errors caused by the supplied configuration, fatal at construction.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ConsumerError::NoBrokers
                | ConsumerError::NoTopic
                | ConsumerError::NoHandler
                | ConsumerError::InvalidSettings(_)
                | ConsumerError::CannotReadSettings(_)
        )
    }

    /// Errors a partition worker recovers from by reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConsumerError::CannotEstablishConnection(_)
                | ConsumerError::FetchFailed(_)
                | ConsumerError::SeekFailed(_)
                | ConsumerError::Disconnected
        )
    }
}
