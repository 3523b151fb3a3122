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
use crate::catalog::lookup_partitions;
use crate::config::{ConsumerConfig, ResolvedConfig};
use crate::error::ConsumerError;
use crate::message::Partition;
use crate::stats::{PartitionSnapshot, PartitionStats};
use crate::worker::PartitionWorker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// Consumes every partition of a topic, one worker task per partition.
///
/// The partition set is resolved once, when the consumer is created, and every worker
/// opens its connection at the newest offset before `new` returns. Workers run from
/// [`start`](TopicConsumer::start) until [`close`](TopicConsumer::close), recovering from
/// transport failures on their own.
pub struct TopicConsumer {
    config: Arc<ResolvedConfig>,
    partitions: Vec<Partition>,
    workers: Vec<PartitionWorker>,
    handles: Vec<JoinHandle<()>>,
    stats: Vec<Arc<PartitionStats>>,
    stop_tx: broadcast::Sender<()>,
    started: AtomicBool,
    closing: AtomicBool,
    span: Span,
}

impl TopicConsumer {
    /// Validates the configuration, discovers the partitions and connects one worker to each.
    ///
    /// Fails without leaving any connection open if the configuration is incomplete, no
    /// broker knows the topic, or any initial connection cannot be established.
    pub async fn new(
        config: ConsumerConfig,
        client: Arc<dyn BrokerClient>,
    ) -> Result<Self, ConsumerError> {
        let config = Arc::new(config.validate()?);
        let parent = config.span.clone().unwrap_or_else(Span::current);
        let span = info_span!(
            parent: &parent,
            "topic_consumer",
            name = config.name.as_deref().unwrap_or_default(),
            topic = %config.topic
        );

        let partitions = lookup_partitions(
            client.as_ref(),
            &config.brokers,
            &config.topic,
            config.lookup_timeout,
        )
        .instrument(span.clone())
        .await
        .inspect_err(|error| {
            span.in_scope(|| {
                error!(
                    %error,
                    brokers = ?config.brokers,
                    "Failed to look up partitions of topic: {}",
                    config.topic
                );
            });
        })?;

        let (stop_tx, _) = broadcast::channel::<()>(1);
        let mut workers: Vec<PartitionWorker> = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            match PartitionWorker::new(config.clone(), client.clone(), partition.clone(), &span)
                .await
            {
                Ok(worker) => workers.push(worker),
                Err(error) => {
                    span.in_scope(|| {
                        error!(
                            %error,
                            partition = partition.id,
                            "Failed to create partition worker for topic: {}",
                            config.topic
                        );
                    });
                    for worker in workers {
                        worker.shutdown().await;
                    }
                    return Err(error);
                }
            }
        }

        span.in_scope(|| {
            info!(
                "Created consumer for topic: {} with {} partition worker(s)",
                config.topic,
                workers.len()
            );
        });
        let stats = workers.iter().map(PartitionWorker::stats).collect();
        Ok(Self {
            config,
            partitions,
            workers,
            handles: Vec::new(),
            stats,
            stop_tx,
            started: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            span,
        })
    }

    /// Spawns one task per partition worker and returns immediately.
    pub fn start(&mut self) -> Result<(), ConsumerError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(ConsumerError::ConsumerClosed);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ConsumerError::AlreadyStarted);
        }

        for worker in self.workers.drain(..) {
            let stop_rx = self.stop_tx.subscribe();
            let span = worker.span().clone();
            self.handles.push(tokio::spawn(worker.run(stop_rx).instrument(span)));
        }
        self.span.in_scope(|| {
            info!(
                "Started {} partition worker(s) for topic: {}",
                self.handles.len(),
                self.config.topic
            );
        });
        Ok(())
    }

    /// Stops every worker and waits for them up to the configured shutdown timeout.
    ///
    /// Workers still running when the timeout elapses are aborted and reported through
    /// [`ConsumerError::ShutdownTimedOut`]. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ConsumerError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = self.stop_tx.send(());
        for worker in self.workers.drain(..) {
            worker.shutdown().await;
        }

        let handles: Vec<JoinHandle<()>> = self.handles.drain(..).collect();
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.config.shutdown_timeout;
        let results = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;

        let result = match results {
            Ok(results) => {
                for result in results {
                    if let Err(error) = result {
                        self.span.in_scope(|| {
                            error!("Partition worker panicked: {error:?}");
                        });
                    }
                }
                Ok(())
            }
            Err(_) => {
                let pending = abort_handles
                    .iter()
                    .filter(|handle| !handle.is_finished())
                    .count();
                for handle in &abort_handles {
                    handle.abort();
                }
                self.span.in_scope(|| {
                    warn!(
                        "Aborted {pending} partition worker(s) that did not stop within: {}",
                        humantime::format_duration(timeout)
                    );
                });
                Err(ConsumerError::ShutdownTimedOut(pending))
            }
        };

        self.span.in_scope(|| {
            info!("Consumer for topic: {} has been closed", self.config.topic);
        });
        result
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    /// The partitions resolved at creation, in the order the broker returned them.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Pause between two failed reconnect attempts of a worker.
    pub fn retry_interval(&self) -> Duration {
        self.config.retry_interval
    }

    pub fn stats(&self) -> Vec<PartitionSnapshot> {
        self.stats.iter().map(|stats| stats.snapshot()).collect()
    }
}

/// Dropping an unclosed consumer signals every worker to stop without waiting for it.
/// Connections of workers that were never started are closed on a spawned task when a
/// runtime is available. [`close`](TopicConsumer::close) waits for both.
impl Drop for TopicConsumer {
    fn drop(&mut self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.stop_tx.send(());
        if self.workers.is_empty() {
            return;
        }
        let workers: Vec<PartitionWorker> = self.workers.drain(..).collect();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(
                    async move {
                        for worker in workers {
                            worker.shutdown().await;
                        }
                    }
                    .instrument(self.span.clone()),
                );
            }
            Err(_) => {
                self.span.in_scope(|| {
                    warn!(
                        "Dropped {} unstarted partition worker(s) outside of a runtime, \
                         their connections were not closed",
                        workers.len()
                    );
                });
            }
        }
    }
}
