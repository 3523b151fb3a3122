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

use chrono::{DateTime, Utc};
use derive_more::Display;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

/// Lifecycle state of a partition worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum WorkerState {
    /// Constructed with an open connection, not started yet.
    #[display("idle")]
    Idle = 0,
    #[display("consuming")]
    Consuming = 1,
    /// The connection broke and is being replaced.
    #[display("recovering")]
    Recovering = 2,
    #[display("stopped")]
    Stopped = 3,
    /// The handler panicked, consumption of the partition has ended.
    #[display("failed")]
    Failed = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Consuming,
            2 => WorkerState::Recovering,
            3 => WorkerState::Stopped,
            4 => WorkerState::Failed,
            _ => WorkerState::Idle,
        }
    }
}

const NOT_RECOVERING: i64 = i64::MIN;

/// Counters of one partition worker.
///
/// Only the owning worker writes, the consumer reads them through [`PartitionSnapshot`].
#[derive(Debug)]
pub struct PartitionStats {
    partition: u32,
    state: AtomicU8,
    delivered: AtomicU64,
    duplicates: AtomicU64,
    fetch_failures: AtomicU64,
    reconnects: AtomicU64,
    failed_attempts: AtomicU64,
    recovering_since: AtomicI64,
    last_offset: AtomicI64,
}

impl PartitionStats {
    pub fn new(partition: u32) -> Self {
        Self {
            partition,
            state: AtomicU8::new(WorkerState::Idle as u8),
            delivered: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            recovering_since: AtomicI64::new(NOT_RECOVERING),
            last_offset: AtomicI64::new(0),
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn record_delivery(&self, offset: i64) {
        self.last_offset.store(offset, Ordering::Relaxed);
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn begin_recovery(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        self.failed_attempts.store(0, Ordering::Relaxed);
        self.recovering_since
            .store(Utc::now().timestamp_micros(), Ordering::Relaxed);
        self.set_state(WorkerState::Recovering);
    }

    pub(crate) fn record_failed_attempt(&self) -> u64 {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn end_recovery(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        self.failed_attempts.store(0, Ordering::Relaxed);
        self.recovering_since.store(NOT_RECOVERING, Ordering::Relaxed);
        self.set_state(WorkerState::Consuming);
    }

    pub fn snapshot(&self) -> PartitionSnapshot {
        let recovering_since = match self.recovering_since.load(Ordering::Relaxed) {
            NOT_RECOVERING => None,
            micros => DateTime::from_timestamp_micros(micros),
        };
        PartitionSnapshot {
            partition: self.partition,
            state: self.state(),
            delivered: self.delivered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            recovering_since,
            last_offset: self.last_offset.load(Ordering::Relaxed),
        }
    }
}

/// Point in time view of a partition worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSnapshot {
    pub partition: u32,
    pub state: WorkerState,
    /// Messages handed to the handler.
    pub delivered: u64,
    /// Messages dropped because their offset was not above the last delivered one.
    pub duplicates: u64,
    pub fetch_failures: u64,
    /// Connections successfully replaced after a failure.
    pub reconnects: u64,
    /// Failed reconnect attempts of the current recovery.
    pub failed_attempts: u64,
    pub recovering_since: Option<DateTime<Utc>>,
    /// Highest delivered offset, `0` until the first delivery.
    pub last_offset: i64,
}
