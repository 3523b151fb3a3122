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

use crate::catalog::LOOKUP_TIMEOUT;
use crate::config::{
    ConsumerConfig, DEFAULT_RECOVER_DELAY, DEFAULT_RETRY_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT,
    MAX_BYTES, MIN_BYTES, READ_BACKOFF_MIN,
};
use crate::error::ConsumerError;
use crate::handler::MessageHandler;
use byte_unit::Byte;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// File form of [`ConsumerConfig`], without the handler.
///
/// Durations use the human readable format (`"200ms"`, `"3s"`), byte sizes accept either
/// a number or a unit (`"4 MiB"`). Missing values fall back to the defaults.
///
/// ```toml
/// name = "orders-audit"
/// brokers = ["10.0.0.1:9092", "10.0.0.2:9092"]
/// topic = "orders"
/// max_bytes = "1 MiB"
/// retry_interval = "5s"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerSettings {
    pub name: Option<String>,
    pub brokers: Vec<String>,
    pub topic: String,
    pub min_bytes: Option<ByteSize>,
    pub max_bytes: Option<ByteSize>,
    pub read_backoff_min: Option<String>,
    pub recover_delay: Option<String>,
    pub retry_interval: Option<String>,
    pub lookup_timeout: Option<String>,
    pub shutdown_timeout: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteSize {
    Bytes(u64),
    Text(String),
}

impl ByteSize {
    fn as_bytes(&self, field: &str) -> Result<usize, ConsumerError> {
        let bytes = match self {
            ByteSize::Bytes(bytes) => *bytes,
            ByteSize::Text(text) => Byte::from_str(text)
                .map_err(|error| {
                    ConsumerError::InvalidSettings(format!("{field}: '{text}', {error}"))
                })?
                .as_u64(),
        };
        usize::try_from(bytes)
            .map_err(|_| ConsumerError::InvalidSettings(format!("{field}: {bytes} is too large")))
    }
}

fn parse_duration(
    field: &str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConsumerError> {
    match value {
        None => Ok(default),
        Some(value) => humantime::Duration::from_str(value)
            .map(Into::into)
            .map_err(|error| {
                ConsumerError::InvalidSettings(format!("{field}: '{value}', {error}"))
            }),
    }
}

impl ConsumerSettings {
    pub fn from_toml_str(content: &str) -> Result<Self, ConsumerError> {
        toml::from_str(content).map_err(|error| ConsumerError::InvalidSettings(error.to_string()))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConsumerError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|error| {
            ConsumerError::CannotReadSettings(format!("{}: {error}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Builds a consumer configuration with the given handler.
    ///
    /// Only malformed values are rejected here, missing brokers or topic are reported when
    /// the consumer is created.
    pub fn into_config(
        self,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ConsumerConfig, ConsumerError> {
        let min_bytes = match &self.min_bytes {
            Some(size) => size.as_bytes("min_bytes")?,
            None => MIN_BYTES,
        };
        let max_bytes = match &self.max_bytes {
            Some(size) => size.as_bytes("max_bytes")?,
            None => MAX_BYTES,
        };

        Ok(ConsumerConfig::builder()
            .maybe_name(self.name)
            .brokers(self.brokers)
            .topic(self.topic)
            .min_bytes(min_bytes)
            .max_bytes(max_bytes)
            .read_backoff_min(parse_duration(
                "read_backoff_min",
                &self.read_backoff_min,
                READ_BACKOFF_MIN,
            )?)
            .recover_delay(parse_duration(
                "recover_delay",
                &self.recover_delay,
                DEFAULT_RECOVER_DELAY,
            )?)
            .retry_interval(parse_duration(
                "retry_interval",
                &self.retry_interval,
                DEFAULT_RETRY_INTERVAL,
            )?)
            .lookup_timeout(parse_duration(
                "lookup_timeout",
                &self.lookup_timeout,
                LOOKUP_TIMEOUT,
            )?)
            .shutdown_timeout(parse_duration(
                "shutdown_timeout",
                &self.shutdown_timeout,
                DEFAULT_SHUTDOWN_TIMEOUT,
            )?)
            .handler(handler)
            .build())
    }
}
