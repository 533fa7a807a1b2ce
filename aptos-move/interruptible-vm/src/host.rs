// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::errors::VMResult;
use primitive_types::U256;
use std::collections::BTreeMap;

/// State backend the storage instructions run against. Implementations decide where
/// values come from (committed storage, a multi-version store, ...) and may refuse an
/// access with [`crate::errors::VMError::StateUnavailable`].
pub trait Host {
    fn sload(&mut self, key: &U256) -> VMResult<U256>;

    fn sstore(&mut self, key: U256, value: U256) -> VMResult<()>;
}

/// Plain map-backed host, unset slots read as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InMemoryHost {
    storage: BTreeMap<U256, U256>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(&self) -> &BTreeMap<U256, U256> {
        &self.storage
    }

    pub fn into_storage(self) -> BTreeMap<U256, U256> {
        self.storage
    }
}

impl From<BTreeMap<U256, U256>> for InMemoryHost {
    fn from(storage: BTreeMap<U256, U256>) -> Self {
        Self { storage }
    }
}

impl Host for InMemoryHost {
    fn sload(&mut self, key: &U256) -> VMResult<U256> {
        Ok(self.storage.get(key).copied().unwrap_or_default())
    }

    fn sstore(&mut self, key: U256, value: U256) -> VMResult<()> {
        self.storage.insert(key, value);
        Ok(())
    }
}
