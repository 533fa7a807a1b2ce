// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    mvmemory::{MVDataError, MVMemory, Version},
    status::TxnIndex,
};
use std::{collections::BTreeMap, fmt::Debug, hash::Hash};
use thiserror::Error;

/// Committed state the block executes on top of.
pub trait StateView: Sync {
    type Key;
    type Value;

    fn get_state_value(&self, key: &Self::Key) -> Option<Self::Value>;
}

impl<K: Ord + Sync, V: Clone + Sync> StateView for BTreeMap<K, V> {
    type Key = K;
    type Value = V;

    fn get_state_value(&self, key: &K) -> Option<V> {
        self.get(key).cloned()
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("read depends on unfinished transaction {0}")]
    Dependency(TxnIndex),
}

/// State as seen by one transaction while it executes.
pub trait TransactionView {
    type Key;
    type Value;

    fn read(&mut self, key: &Self::Key) -> Result<Option<Self::Value>, ReadError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ReadKind {
    /// Read the write of a lower transaction.
    Version(Version),
    /// Read from storage.
    Storage,
}

/// What a read observed, so validation can tell whether it would still observe it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadDescriptor<K> {
    key: K,
    kind: ReadKind,
}

impl<K> ReadDescriptor<K> {
    pub fn from_version(key: K, version: Version) -> Self {
        Self {
            key,
            kind: ReadKind::Version(version),
        }
    }

    pub fn from_storage(key: K) -> Self {
        Self {
            key,
            kind: ReadKind::Storage,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn validate_version(&self, version: Version) -> bool {
        self.kind == ReadKind::Version(version)
    }

    pub fn validate_storage(&self) -> bool {
        self.kind == ReadKind::Storage
    }
}

/// View of a speculatively executing transaction: resolves reads in the multi-version
/// store first and in storage otherwise, and records what it saw.
pub struct SpeculativeView<'a, K, V, S> {
    versioned_cache: &'a MVMemory<K, V>,
    base_view: &'a S,
    txn_idx: TxnIndex,
    captured_reads: Vec<ReadDescriptor<K>>,
    read_dependency: Option<TxnIndex>,
}

impl<'a, K, V, S> SpeculativeView<'a, K, V, S>
where
    K: Hash + Clone + Eq + Debug,
    V: Clone,
    S: StateView<Key = K, Value = V>,
{
    pub fn new(versioned_cache: &'a MVMemory<K, V>, base_view: &'a S, txn_idx: TxnIndex) -> Self {
        Self {
            versioned_cache,
            base_view,
            txn_idx,
            captured_reads: Vec::new(),
            read_dependency: None,
        }
    }

    pub fn txn_idx(&self) -> TxnIndex {
        self.txn_idx
    }

    /// The first unfinished transaction a read ran into, if any. Whatever the
    /// transaction produced after that is meaningless.
    pub fn read_dependency(&self) -> Option<TxnIndex> {
        self.read_dependency
    }

    pub fn take_reads(&mut self) -> Vec<ReadDescriptor<K>> {
        std::mem::take(&mut self.captured_reads)
    }
}

impl<K, V, S> TransactionView for SpeculativeView<'_, K, V, S>
where
    K: Hash + Clone + Eq + Debug,
    V: Clone,
    S: StateView<Key = K, Value = V>,
{
    type Key = K;
    type Value = V;

    fn read(&mut self, key: &K) -> Result<Option<V>, ReadError> {
        match self.versioned_cache.read(key, self.txn_idx) {
            Ok((version, value)) => {
                self.captured_reads
                    .push(ReadDescriptor::from_version(key.clone(), version));
                Ok(Some(value.as_ref().clone()))
            },
            Err(MVDataError::Uninitialized) => {
                self.captured_reads
                    .push(ReadDescriptor::from_storage(key.clone()));
                Ok(self.base_view.get_state_value(key))
            },
            Err(MVDataError::Dependency(dep_idx)) => {
                self.read_dependency.get_or_insert(dep_idx);
                Err(ReadError::Dependency(dep_idx))
            },
        }
    }
}

/// View used when transactions run one after the other: the writes of every earlier
/// transaction are already applied to `committed`.
pub struct SequentialView<'a, K, V, S> {
    committed: &'a BTreeMap<K, V>,
    base_view: &'a S,
}

impl<'a, K, V, S> SequentialView<'a, K, V, S> {
    pub fn new(committed: &'a BTreeMap<K, V>, base_view: &'a S) -> Self {
        Self {
            committed,
            base_view,
        }
    }
}

impl<K, V, S> TransactionView for SequentialView<'_, K, V, S>
where
    K: Ord,
    V: Clone,
    S: StateView<Key = K, Value = V>,
{
    type Key = K;
    type Value = V;

    fn read(&mut self, key: &K) -> Result<Option<V>, ReadError> {
        match self.committed.get(key) {
            Some(value) => Ok(Some(value.clone())),
            None => Ok(self.base_view.get_state_value(key)),
        }
    }
}

/// Whether every read in `reads` would observe the same thing if `txn_idx` ran now.
pub(crate) fn validate_reads<K, V>(
    versioned_cache: &MVMemory<K, V>,
    reads: &[ReadDescriptor<K>],
    txn_idx: TxnIndex,
) -> bool
where
    K: Hash + Clone + Eq + Debug,
    V: Clone,
{
    reads
        .iter()
        .all(|r| match versioned_cache.read(r.key(), txn_idx) {
            Ok((version, _)) => r.validate_version(version),
            // Dependency implies a validation failure.
            Err(MVDataError::Dependency(_)) => false,
            Err(MVDataError::Uninitialized) => r.validate_storage(),
        })
}
