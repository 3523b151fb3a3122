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

use crate::broker::{BrokerClient, BrokerConnection, ConnectionSettings};
use crate::config::ResolvedConfig;
use crate::error::ConsumerError;
use crate::message::{Message, Partition};
use crate::stats::{PartitionStats, WorkerState};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};

/// Consumes a single partition for its whole lifetime.
///
/// The worker owns its connection and the highest delivered offset. When a fetch fails it
/// waits `recover_delay`, drops the connection and reconnects to the newest offset, retrying
/// every `retry_interval` until it succeeds or the consumer is closed. Messages at or below
/// the highest delivered offset are dropped.
pub struct PartitionWorker {
    partition: Partition,
    config: Arc<ResolvedConfig>,
    client: Arc<dyn BrokerClient>,
    connection: Option<Box<dyn BrokerConnection>>,
    max_offset: i64,
    stats: Arc<PartitionStats>,
    span: Span,
}

enum Outcome {
    Continue,
    Stop,
}

impl PartitionWorker {
    /// Opens the initial connection, positioned at the newest offset of the partition.
    pub async fn new(
        config: Arc<ResolvedConfig>,
        client: Arc<dyn BrokerClient>,
        partition: Partition,
        parent: &Span,
    ) -> Result<Self, ConsumerError> {
        let span = info_span!(parent: parent, "partition", partition = partition.id);
        let mut worker = Self {
            stats: Arc::new(PartitionStats::new(partition.id)),
            partition,
            config,
            client,
            connection: None,
            max_offset: 0,
            span,
        };
        let settings = worker.config.connection_settings(worker.partition.id);
        let connection = open_connection(worker.client.as_ref(), &settings)
            .instrument(worker.span.clone())
            .await?;
        worker.connection = Some(connection);
        Ok(worker)
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn stats(&self) -> Arc<PartitionStats> {
        self.stats.clone()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Runs the fetch loop until a stop signal is received or the handler panics.
    pub async fn run(mut self, mut stop_rx: broadcast::Receiver<()>) {
        info!(
            "Partition worker for topic: {} has started, leader: {}",
            self.partition.topic, self.partition.leader
        );
        self.stats.set_state(WorkerState::Consuming);

        let final_state = loop {
            let fetched = match self.connection.as_mut() {
                Some(connection) => {
                    tokio::select! {
                        biased;
                        _ = stop_rx.recv() => break WorkerState::Stopped,
                        fetched = connection.fetch_next() => fetched,
                    }
                }
                None => Err(ConsumerError::Disconnected),
            };

            let outcome = match fetched {
                Ok(message) => self.deliver(message).await,
                Err(error) => self.recover(error, &mut stop_rx).await,
            };
            match outcome {
                Outcome::Continue => {}
                Outcome::Stop => break self.stop_state(),
            }
        };

        self.close_connection().await;
        self.stats.set_state(final_state);
        info!("Partition worker has finished, state: {final_state}");
    }

    /// Closes the connection of a worker that was never started.
    pub async fn shutdown(mut self) {
        self.close_connection().await;
        self.stats.set_state(WorkerState::Stopped);
    }

    fn stop_state(&self) -> WorkerState {
        match self.stats.state() {
            WorkerState::Failed => WorkerState::Failed,
            _ => WorkerState::Stopped,
        }
    }

    async fn deliver(&mut self, message: Message) -> Outcome {
        if message.offset <= self.max_offset {
            trace!(
                offset = message.offset,
                max_offset = self.max_offset,
                "Dropping already delivered message"
            );
            self.stats.record_duplicate();
            return Outcome::Continue;
        }

        let offset = message.offset;
        self.max_offset = offset;
        self.stats.record_delivery(offset);

        let handler = self.config.handler.clone();
        let span = self.span.clone();
        let handled = AssertUnwindSafe(async move { handler.handle(span, message).await })
            .catch_unwind()
            .await;
        if handled.is_err() {
            error!(offset, "Message handler panicked, partition consumption has ended");
            self.stats.set_state(WorkerState::Failed);
            return Outcome::Stop;
        }
        Outcome::Continue
    }

    async fn recover(
        &mut self,
        cause: ConsumerError,
        stop_rx: &mut broadcast::Receiver<()>,
    ) -> Outcome {
        self.stats.begin_recovery();
        if sleep_or_stop(self.config.recover_delay, stop_rx).await {
            return Outcome::Stop;
        }
        error!(error = %cause, "Partition reader broken, starting to recover...");
        self.close_connection().await;

        let settings = self.config.connection_settings(self.partition.id);
        loop {
            let opened = tokio::select! {
                biased;
                _ = stop_rx.recv() => return Outcome::Stop,
                opened = open_connection(self.client.as_ref(), &settings) => opened,
            };

            match opened {
                Ok(connection) => {
                    self.connection = Some(connection);
                    self.stats.end_recovery();
                    info!(
                        max_offset = self.max_offset,
                        "Partition reader recovered, resuming from the newest offset"
                    );
                    return Outcome::Continue;
                }
                Err(error) => {
                    let attempt = self.stats.record_failed_attempt();
                    error!(
                        %error,
                        attempt,
                        "Partition reader recovery failed, retrying in: {}",
                        humantime::format_duration(self.config.retry_interval)
                    );
                    if sleep_or_stop(self.config.retry_interval, stop_rx).await {
                        return Outcome::Stop;
                    }
                }
            }
        }
    }

    async fn close_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(error) = connection.close().await {
                warn!(%error, "Failed to close partition connection");
            }
        }
    }
}

async fn open_connection(
    client: &dyn BrokerClient,
    settings: &ConnectionSettings,
) -> Result<Box<dyn BrokerConnection>, ConsumerError> {
    let mut connection = client.connect(settings).await?;
    if let Err(error) = connection.seek_to_newest().await {
        if let Err(close_error) = connection.close().await {
            debug!(error = %close_error, "Failed to close unseekable connection");
        }
        return Err(error);
    }
    debug!("Connection opened at the newest offset");
    Ok(connection)
}

/// Sleeps for `duration`, returns `true` when a stop signal arrived first.
async fn sleep_or_stop(duration: Duration, stop_rx: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        biased;
        _ = stop_rx.recv() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
