// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    errors::{code_invariant_error, PanicError},
    status::TxnIndex,
};
use dashmap::DashMap;
use std::{collections::BTreeMap, fmt::Debug, hash::Hash, sync::Arc};

pub type Incarnation = u32;
pub type Version = (TxnIndex, Incarnation);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flag {
    Done,
    Estimate,
}

#[derive(Debug)]
struct Entry<V> {
    incarnation: Incarnation,
    flag: Flag,
    value: Arc<V>,
}

/// Returned as Err(..) when failed to read from the multi-version data-structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MVDataError {
    /// No lower transaction wrote the key; the value comes from storage.
    Uninitialized,
    /// The closest lower write belongs to a transaction that is being re-executed.
    Dependency(TxnIndex),
}

/// Multi-version store of the writes of a block's transactions. For every key, entries
/// are ordered by transaction index; a read by transaction `i` observes the entry of the
/// highest index below `i`.
pub struct MVMemory<K, V> {
    data: DashMap<K, BTreeMap<TxnIndex, Entry<V>>>,
}

impl<K: Hash + Clone + Eq + Debug, V: Clone> MVMemory<K, V> {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    pub fn write(&self, key: K, txn_idx: TxnIndex, incarnation: Incarnation, value: V) {
        self.data.entry(key).or_default().insert(txn_idx, Entry {
            incarnation,
            flag: Flag::Done,
            value: Arc::new(value),
        });
    }

    /// Flags the write of `txn_idx` to `key` as an estimate: readers must wait for the
    /// transaction to be re-executed.
    pub fn mark_estimate(&self, key: &K, txn_idx: TxnIndex) -> Result<(), PanicError> {
        let mut entries = self.data.get_mut(key).ok_or_else(|| {
            code_invariant_error(format!("estimate for unknown key {:?}", key))
        })?;
        let entry = entries.get_mut(&txn_idx).ok_or_else(|| {
            code_invariant_error(format!(
                "estimate for missing write of txn {} to key {:?}",
                txn_idx, key
            ))
        })?;
        entry.flag = Flag::Estimate;
        Ok(())
    }

    pub fn delete(&self, key: &K, txn_idx: TxnIndex) {
        if let Some(mut entries) = self.data.get_mut(key) {
            entries.remove(&txn_idx);
        }
    }

    pub fn read(&self, key: &K, txn_idx: TxnIndex) -> Result<(Version, Arc<V>), MVDataError> {
        let entries = self.data.get(key).ok_or(MVDataError::Uninitialized)?;
        match entries.range(..txn_idx).next_back() {
            Some((idx, entry)) => match entry.flag {
                Flag::Estimate => Err(MVDataError::Dependency(*idx)),
                Flag::Done => Ok(((*idx, entry.incarnation), entry.value.clone())),
            },
            None => Err(MVDataError::Uninitialized),
        }
    }

    /// Latest value of every key, i.e. the block's final write set once all
    /// transactions are committed.
    pub fn into_final_writes(self) -> BTreeMap<K, V>
    where
        K: Ord,
    {
        self.data
            .into_iter()
            .filter_map(|(key, mut entries)| {
                let (_, entry) = entries.pop_last()?;
                let value = Arc::try_unwrap(entry.value).unwrap_or_else(|arc| (*arc).clone());
                Some((key, value))
            })
            .collect()
    }
}

impl<K: Hash + Clone + Eq + Debug, V: Clone> Default for MVMemory<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
