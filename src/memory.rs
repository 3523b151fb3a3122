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

//! An in-process broker for tests and demos.
//!
//! Partitions are plain in-memory logs. Addresses can be taken down or made to hang, and
//! fetch or connect failures can be injected per partition to exercise recovery.

use crate::broker::{BrokerClient, BrokerConnection, ConnectionSettings};
use crate::error::ConsumerError;
use crate::message::{BrokerInfo, Message, Partition};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Arc<PartitionLog>>>,
    down: HashSet<String>,
    hanging: HashSet<String>,
    lookups: Vec<String>,
}

#[derive(Debug)]
struct PartitionLog {
    topic: String,
    id: u32,
    messages: Mutex<Vec<Message>>,
    appended: watch::Sender<usize>,
    fetch_failures: AtomicUsize,
    connect_failures: AtomicUsize,
    active_fetchers: AtomicUsize,
    open_connections: AtomicUsize,
    connects: AtomicUsize,
}

impl PartitionLog {
    fn new(topic: &str, id: u32) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            topic: topic.to_owned(),
            id,
            messages: Mutex::new(Vec::new()),
            appended,
            fetch_failures: AtomicUsize::new(0),
            connect_failures: AtomicUsize::new(0),
            active_fetchers: AtomicUsize::new(0),
            open_connections: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        }
    }

    async fn append(&self, offset: Option<i64>, key: Option<Bytes>, value: Bytes) -> i64 {
        let mut messages = self.messages.lock().await;
        let offset = offset.unwrap_or_else(|| {
            messages
                .last()
                .map(|message| message.offset + 1)
                .unwrap_or_default()
        });
        let mut message = Message::new(self.topic.as_str(), self.id, offset, value);
        message.key = key;
        messages.push(message);
        let len = messages.len();
        drop(messages);
        self.appended.send_replace(len);
        offset
    }

    fn wake_fetchers(&self) {
        self.appended.send_modify(|_| {});
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

fn leader_for(address: &str) -> BrokerInfo {
    match address.rsplit_once(':') {
        Some((host, port)) => BrokerInfo::new(1, host, port.parse().unwrap_or_default()),
        None => BrokerInfo::new(1, address, 0),
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `partitions` empty partitions, replacing any topic of the same name.
    pub async fn create_topic(&self, topic: &str, partitions: u32) {
        let logs = (0..partitions)
            .map(|id| Arc::new(PartitionLog::new(topic, id)))
            .collect();
        self.state.lock().await.topics.insert(topic.to_owned(), logs);
    }

    /// Appends a message at the next offset and returns it. Offsets start at `0`.
    pub async fn produce(
        &self,
        topic: &str,
        partition: u32,
        value: impl Into<Bytes>,
    ) -> Result<i64, ConsumerError> {
        let log = self.log(topic, partition).await?;
        Ok(log.append(None, None, value.into()).await)
    }

    pub async fn produce_with_key(
        &self,
        topic: &str,
        partition: u32,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<i64, ConsumerError> {
        let log = self.log(topic, partition).await?;
        Ok(log.append(None, Some(key.into()), value.into()).await)
    }

    /// Appends a message with an explicit offset, which may repeat or go back.
    pub async fn append_at(
        &self,
        topic: &str,
        partition: u32,
        offset: i64,
        value: impl Into<Bytes>,
    ) -> Result<(), ConsumerError> {
        let log = self.log(topic, partition).await?;
        log.append(Some(offset), None, value.into()).await;
        Ok(())
    }

    /// Makes the next `count` fetches of the partition fail, waking any waiting fetch.
    pub async fn fail_fetches(
        &self,
        topic: &str,
        partition: u32,
        count: usize,
    ) -> Result<(), ConsumerError> {
        let log = self.log(topic, partition).await?;
        log.fetch_failures.fetch_add(count, Ordering::AcqRel);
        log.wake_fetchers();
        Ok(())
    }

    /// Makes the next `count` connection attempts to the partition fail.
    pub async fn fail_connects(
        &self,
        topic: &str,
        partition: u32,
        count: usize,
    ) -> Result<(), ConsumerError> {
        let log = self.log(topic, partition).await?;
        log.connect_failures.fetch_add(count, Ordering::AcqRel);
        Ok(())
    }

    /// A down address refuses partition lookups and connections.
    pub async fn set_down(&self, address: &str, down: bool) {
        let mut state = self.state.lock().await;
        if down {
            state.down.insert(address.to_owned());
        } else {
            state.down.remove(address);
        }
    }

    /// A hanging address never answers partition lookups.
    pub async fn set_hanging(&self, address: &str, hanging: bool) {
        let mut state = self.state.lock().await;
        if hanging {
            state.hanging.insert(address.to_owned());
        } else {
            state.hanging.remove(address);
        }
    }

    /// Addresses that received a partition lookup, in order.
    pub async fn lookups(&self) -> Vec<String> {
        self.state.lock().await.lookups.clone()
    }

    /// Number of fetches currently waiting or reading on the topic.
    pub async fn active_fetchers(&self, topic: &str) -> usize {
        self.sum(topic, |log| log.active_fetchers.load(Ordering::Acquire))
            .await
    }

    pub async fn open_connections(&self, topic: &str) -> usize {
        self.sum(topic, |log| log.open_connections.load(Ordering::Acquire))
            .await
    }

    /// Connections established to the partition so far, including closed ones.
    pub async fn connects(&self, topic: &str, partition: u32) -> Result<usize, ConsumerError> {
        let log = self.log(topic, partition).await?;
        Ok(log.connects.load(Ordering::Acquire))
    }

    async fn sum(&self, topic: &str, value: impl Fn(&PartitionLog) -> usize) -> usize {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|logs| logs.iter().map(|log| value(log.as_ref())).sum())
            .unwrap_or_default()
    }

    async fn log(&self, topic: &str, partition: u32) -> Result<Arc<PartitionLog>, ConsumerError> {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .and_then(|logs| logs.get(partition as usize))
            .cloned()
            .ok_or_else(|| ConsumerError::UnknownTopic(format!("{topic}/{partition}")))
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn list_partitions(
        &self,
        address: &str,
        topic: &str,
        _timeout: Duration,
    ) -> Result<Vec<Partition>, ConsumerError> {
        let (hanging, result) = {
            let mut state = self.state.lock().await;
            state.lookups.push(address.to_owned());
            let hanging = state.hanging.contains(address);
            let result = if state.down.contains(address) {
                Err(ConsumerError::CannotEstablishConnection(address.to_owned()))
            } else {
                match state.topics.get(topic) {
                    Some(logs) => Ok(logs
                        .iter()
                        .map(|log| Partition::new(topic, log.id, leader_for(address)))
                        .collect()),
                    None => Err(ConsumerError::UnknownTopic(topic.to_owned())),
                }
            };
            (hanging, result)
        };

        if hanging {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn BrokerConnection>, ConsumerError> {
        {
            let state = self.state.lock().await;
            if settings
                .brokers
                .iter()
                .all(|address| state.down.contains(address))
            {
                return Err(ConsumerError::CannotEstablishConnection(
                    settings.brokers.join(","),
                ));
            }
        }

        let log = self.log(&settings.topic, settings.partition).await?;
        if take_one(&log.connect_failures) {
            return Err(ConsumerError::CannotEstablishConnection(format!(
                "leader of {}/{} is not available",
                settings.topic, settings.partition
            )));
        }

        log.connects.fetch_add(1, Ordering::AcqRel);
        log.open_connections.fetch_add(1, Ordering::AcqRel);
        trace!(
            topic = settings.topic,
            partition = settings.partition,
            "Opened memory connection"
        );
        Ok(Box::new(MemoryConnection {
            appended: log.appended.subscribe(),
            log,
            position: 0,
            closed: false,
        }))
    }
}

/// A connection reading one in-memory partition.
#[derive(Debug)]
pub struct MemoryConnection {
    log: Arc<PartitionLog>,
    appended: watch::Receiver<usize>,
    position: usize,
    closed: bool,
}

struct ActiveFetch<'a>(&'a AtomicUsize);

impl<'a> ActiveFetch<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveFetch<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn fetch_next(&mut self) -> Result<Message, ConsumerError> {
        let log = self.log.clone();
        let _active = ActiveFetch::enter(&log.active_fetchers);
        loop {
            if self.closed {
                return Err(ConsumerError::Disconnected);
            }
            self.appended.borrow_and_update();
            if take_one(&log.fetch_failures) {
                return Err(ConsumerError::FetchFailed(format!(
                    "connection to {}/{} reset",
                    log.topic, log.id
                )));
            }
            {
                let messages = log.messages.lock().await;
                if let Some(message) = messages.get(self.position) {
                    self.position += 1;
                    return Ok(message.clone());
                }
            }
            if self.appended.changed().await.is_err() {
                return Err(ConsumerError::Disconnected);
            }
        }
    }

    async fn seek_to_newest(&mut self) -> Result<(), ConsumerError> {
        if self.closed {
            return Err(ConsumerError::SeekFailed("connection is closed".to_owned()));
        }
        self.position = self.log.messages.lock().await.len();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConsumerError> {
        if !self.closed {
            self.closed = true;
            self.log.open_connections.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.log.open_connections.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
