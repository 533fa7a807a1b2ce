// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Cooperative cancellation of interpreter runs.
//!
//! A [`CancellationHandle`] is issued for exactly one task attempt. When the scheduler
//! raises it (through the paired [`Canceller`]), the interpreter consults the shared
//! [`InterruptionLedger`] at its next instruction boundary. The ledger makes sure a
//! task identity is not force-stopped on two consecutive encounters of a raised
//! signal: the first encounter interrupts and leaves a marker behind, the next one
//! consumes the marker and lets the instruction run.

use lru::LruCache;
use parking_lot::Mutex;
use std::{
    fmt,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Default number of task identities remembered by the ledger.
pub const INTERRUPTED_TXN_CACHE_SIZE: usize = 90_000;

/// Identity of a transaction across attempts (and blocks), e.g. its hash.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskId([u8; 32]);

impl TaskId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InterruptDecision {
    /// Stop the attempt now.
    Interrupt,
    /// Keep executing even though cancellation was requested.
    Exempt,
}

/// Bounded, least-recently-used record of task identities that were force-interrupted
/// and not yet exempted. Shared by all workers.
pub struct InterruptionLedger {
    cache: Mutex<LruCache<TaskId, ()>>,
}

impl InterruptionLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Toggles the marker of `task_id`: inserts it and interrupts if absent, removes it
    /// and exempts if present.
    pub fn check(&self, task_id: TaskId) -> InterruptDecision {
        let mut cache = self.cache.lock();
        if cache.pop(&task_id).is_some() {
            InterruptDecision::Exempt
        } else {
            cache.put(task_id, ());
            InterruptDecision::Interrupt
        }
    }

    /// Whether a marker is currently held for `task_id`. Does not touch recency.
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.cache.lock().contains(task_id)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

impl Default for InterruptionLedger {
    fn default() -> Self {
        Self::new(INTERRUPTED_TXN_CACHE_SIZE)
    }
}

impl fmt::Debug for InterruptionLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptionLedger")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Worker side of a cancellation request, scoped to a single task attempt.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    task_id: TaskId,
    ledger: Arc<InterruptionLedger>,
    requested: Arc<AtomicBool>,
}

/// Scheduler side of a cancellation request.
#[derive(Clone, Debug)]
pub struct Canceller {
    requested: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new(task_id: TaskId, ledger: Arc<InterruptionLedger>) -> (Self, Canceller) {
        let requested = Arc::new(AtomicBool::new(false));
        let handle = Self {
            task_id,
            ledger,
            requested: requested.clone(),
        };
        (handle, Canceller { requested })
    }

    /// Non-blocking check of the cancellation signal.
    pub fn is_cancellation_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn ledger(&self) -> &Arc<InterruptionLedger> {
        &self.ledger
    }
}

impl Canceller {
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
