// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Bookkeeping of which tasks of a block are waiting, running or done.
//!
//! A [`TaskStatusManager`] is owned and mutated by a single coordinator thread, so it
//! uses plain ordered sets. Every task id is in at most one of `pending`, `in_progress`
//! and `complete`, and in none of them while it waits on unresolved dependencies.

use crate::errors::{code_invariant_error, PanicError};
use std::collections::{BTreeSet, HashMap};

pub type TxnIndex = usize;

/// How [`TaskStatusManager::clear_in_progress`] treats a task that is not in progress.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemovalMode {
    /// Absence is a code invariant violation.
    Strict,
    /// Absence is ignored.
    Lenient,
}

#[derive(Clone, Debug, Default)]
pub struct TaskStatusManager {
    pending: BTreeSet<TxnIndex>,
    in_progress: BTreeSet<TxnIndex>,
    complete: BTreeSet<TxnIndex>,
    /// blocker -> tasks waiting on it.
    dependency: HashMap<TxnIndex, BTreeSet<TxnIndex>>,
    /// dependent -> unresolved blockers. Never holds an empty set.
    block_count: HashMap<TxnIndex, BTreeSet<TxnIndex>>,
}

impl TaskStatusManager {
    /// Manager for a block of `num_tasks` tasks, all pending.
    pub fn new(num_tasks: usize) -> Self {
        Self {
            pending: (0..num_tasks).collect(),
            ..Self::default()
        }
    }

    /// Moves the smallest pending task to in-progress and returns it.
    pub fn take_next_pending(&mut self) -> Option<TxnIndex> {
        let tx = self.pending.pop_first()?;
        self.in_progress.insert(tx);
        Some(tx)
    }

    pub fn push_pending(&mut self, tx: TxnIndex) {
        self.pending.insert(tx);
    }

    pub fn push_pending_set(&mut self, txs: impl IntoIterator<Item = TxnIndex>) {
        for tx in txs {
            self.push_pending(tx);
        }
    }

    pub fn mark_complete(&mut self, tx: TxnIndex) -> Result<(), PanicError> {
        if !self.in_progress.remove(&tx) {
            return Err(code_invariant_error(format!(
                "task {} marked complete while not in progress",
                tx
            )));
        }
        self.complete.insert(tx);
        Ok(())
    }

    /// Retracts a completion. The task is not re-queued.
    pub fn clear_complete(&mut self, tx: TxnIndex) {
        self.complete.remove(&tx);
    }

    pub fn clear_in_progress(&mut self, tx: TxnIndex, mode: RemovalMode) -> Result<(), PanicError> {
        if !self.in_progress.remove(&tx) && mode == RemovalMode::Strict {
            return Err(code_invariant_error(format!(
                "task {} removed from in-progress while not in progress",
                tx
            )));
        }
        Ok(())
    }

    pub fn check_in_progress(&self, tx: TxnIndex) -> bool {
        self.in_progress.contains(&tx)
    }

    pub fn check_pending(&self, tx: TxnIndex) -> bool {
        self.pending.contains(&tx)
    }

    pub fn check_complete(&self, tx: TxnIndex) -> bool {
        self.complete.contains(&tx)
    }

    /// Records that `dependent` waits on each of `txs`. Blockers that are already
    /// complete do not block; any stale edge to them is dropped. Returns whether
    /// `dependent` is still blocked.
    pub fn add_dependencies(
        &mut self,
        txs: impl IntoIterator<Item = TxnIndex>,
        dependent: TxnIndex,
    ) -> bool {
        for tx in txs {
            if self.complete.contains(&tx) {
                if let Some(blockers) = self.block_count.get_mut(&dependent) {
                    blockers.remove(&tx);
                }
                continue;
            }
            self.dependency.entry(tx).or_default().insert(dependent);
            self.block_count.entry(dependent).or_default().insert(tx);
        }

        let blocked = self
            .block_count
            .get(&dependent)
            .is_some_and(|blockers| !blockers.is_empty());
        if !blocked {
            self.block_count.remove(&dependent);
        }
        blocked
    }

    /// Resolves every edge out of `tx`. Dependents left without blockers become pending.
    pub fn remove_dependency(&mut self, tx: TxnIndex) {
        let Some(dependents) = self.dependency.remove(&tx) else {
            return;
        };
        for dependent in dependents {
            if let Some(blockers) = self.block_count.get_mut(&dependent) {
                blockers.remove(&tx);
                if blockers.is_empty() {
                    self.block_count.remove(&dependent);
                    self.push_pending(dependent);
                }
            }
        }
    }

    pub fn is_blocked(&self, tx: TxnIndex) -> bool {
        self.block_count.contains_key(&tx)
    }

    pub fn blockers_of(&self, dependent: TxnIndex) -> Option<&BTreeSet<TxnIndex>> {
        self.block_count.get(&dependent)
    }

    /// Largest `k` such that every task in `0..=k` is complete.
    pub fn max_all_complete(&self) -> Option<TxnIndex> {
        let last = *self.complete.last()?;
        if last + 1 == self.complete.len() {
            return Some(last);
        }
        self.complete
            .iter()
            .enumerate()
            .take_while(|(expected, tx)| *expected == **tx)
            .last()
            .map(|(_, tx)| *tx)
    }

    /// Tasks from `tx_from` up to [`Self::max_all_complete`] that are not in progress.
    pub fn get_revalidation_range(&self, tx_from: TxnIndex) -> Vec<TxnIndex> {
        match self.max_all_complete() {
            Some(max) => (tx_from..=max)
                .filter(|tx| !self.check_in_progress(*tx))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn min_pending(&self) -> Option<TxnIndex> {
        self.pending.first().copied()
    }

    pub fn count_complete(&self) -> usize {
        self.complete.len()
    }
}
