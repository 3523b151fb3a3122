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

use crate::broker::ConnectionSettings;
use crate::catalog::LOOKUP_TIMEOUT;
use crate::error::ConsumerError;
use crate::handler::MessageHandler;
use bon::Builder;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

/// Default lower fetch threshold in bytes.
pub const MIN_BYTES: usize = 512;
/// Default upper fetch threshold in bytes.
pub const MAX_BYTES: usize = 4 * 1024 * 1024;
/// Smallest accepted reconnect backoff of the broker client.
pub const READ_BACKOFF_MIN: Duration = Duration::from_millis(100);
/// Margin added to `min_bytes` when `max_bytes` is configured below it.
pub const MAX_BYTES_MARGIN: usize = 64;
pub const DEFAULT_RECOVER_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration of a [`TopicConsumer`](crate::TopicConsumer).
///
/// `brokers`, `topic` and `handler` are required, they are checked when the consumer is
/// created rather than here so that a missing value is reported as a [`ConsumerError`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use topic_consumer::prelude::*;
///
/// let config = ConsumerConfig::builder()
///     .name("audit")
///     .brokers(vec!["127.0.0.1:9092".to_string()])
///     .topic("orders")
///     .handler(Arc::new(LogMessageHandler))
///     .build();
/// ```
#[derive(Builder)]
pub struct ConsumerConfig {
    /// Tag attached to the consumer span, for log correlation only.
    #[builder(into)]
    pub name: Option<String>,
    /// Broker addresses, queried in order during partition lookup.
    #[builder(default)]
    pub brokers: Vec<String>,
    #[builder(default, into)]
    pub topic: String,
    /// `0` ⇒ [`MIN_BYTES`].
    #[builder(default = MIN_BYTES)]
    pub min_bytes: usize,
    /// `0` ⇒ [`MAX_BYTES`]. Raised to `min_bytes + 64` when below `min_bytes`.
    #[builder(default = MAX_BYTES)]
    pub max_bytes: usize,
    /// Never lower than [`READ_BACKOFF_MIN`].
    #[builder(default = READ_BACKOFF_MIN)]
    pub read_backoff_min: Duration,
    pub handler: Option<Arc<dyn MessageHandler>>,
    /// Parent of the consumer span. Defaults to the span current at creation.
    pub span: Option<Span>,
    /// Pause after a failed fetch, before the broken connection is replaced.
    #[builder(default = DEFAULT_RECOVER_DELAY)]
    pub recover_delay: Duration,
    /// Pause between two failed reconnect attempts.
    #[builder(default = DEFAULT_RETRY_INTERVAL)]
    pub retry_interval: Duration,
    #[builder(default = LOOKUP_TIMEOUT)]
    pub lookup_timeout: Duration,
    /// How long `close` waits for the workers before aborting them.
    #[builder(default = DEFAULT_SHUTDOWN_TIMEOUT)]
    pub shutdown_timeout: Duration,
}

impl Debug for ConsumerConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("name", &self.name)
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("min_bytes", &self.min_bytes)
            .field("max_bytes", &self.max_bytes)
            .field("read_backoff_min", &self.read_backoff_min)
            .field("handler", &self.handler.as_ref().map(|_| "<handler>"))
            .field("recover_delay", &self.recover_delay)
            .field("retry_interval", &self.retry_interval)
            .field("lookup_timeout", &self.lookup_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl ConsumerConfig {
    /// Checks the required values and applies the defaults.
    pub fn validate(self) -> Result<ResolvedConfig, ConsumerError> {
        if self.brokers.is_empty() {
            return Err(ConsumerError::NoBrokers);
        }
        if self.topic.is_empty() {
            return Err(ConsumerError::NoTopic);
        }
        let Some(handler) = self.handler else {
            return Err(ConsumerError::NoHandler);
        };

        let min_bytes = if self.min_bytes == 0 {
            MIN_BYTES
        } else {
            self.min_bytes
        };
        let mut max_bytes = if self.max_bytes == 0 {
            MAX_BYTES
        } else {
            self.max_bytes
        };
        if max_bytes < min_bytes {
            max_bytes = min_bytes.saturating_add(MAX_BYTES_MARGIN);
        }

        Ok(ResolvedConfig {
            name: self.name.filter(|name| !name.is_empty()),
            brokers: self.brokers,
            topic: self.topic,
            min_bytes,
            max_bytes,
            read_backoff_min: self.read_backoff_min.max(READ_BACKOFF_MIN),
            handler,
            span: self.span,
            recover_delay: self.recover_delay,
            retry_interval: self.retry_interval,
            lookup_timeout: self.lookup_timeout,
            shutdown_timeout: self.shutdown_timeout,
        })
    }
}

/// A validated configuration, shared read-only by the consumer and its workers.
pub struct ResolvedConfig {
    pub name: Option<String>,
    pub brokers: Vec<String>,
    pub topic: String,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub read_backoff_min: Duration,
    pub handler: Arc<dyn MessageHandler>,
    pub span: Option<Span>,
    pub recover_delay: Duration,
    pub retry_interval: Duration,
    pub lookup_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Debug for ResolvedConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("name", &self.name)
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("min_bytes", &self.min_bytes)
            .field("max_bytes", &self.max_bytes)
            .field("read_backoff_min", &self.read_backoff_min)
            .field("recover_delay", &self.recover_delay)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

impl ResolvedConfig {
    pub fn connection_settings(&self, partition: u32) -> ConnectionSettings {
        ConnectionSettings {
            brokers: self.brokers.clone(),
            topic: self.topic.clone(),
            partition,
            min_bytes: self.min_bytes,
            max_bytes: self.max_bytes,
            read_backoff_min: self.read_backoff_min,
        }
    }
}
