// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use primitive_types::U256;

/// Byte-addressable memory of a single invocation, grown in 32-byte words.
///
/// All accessors assume the interpreter already expanded the memory to cover the
/// accessed range (and charged for it) before the instruction runs.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    store: Vec<u8>,
    last_gas_cost: u64,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Grows the memory to `size` bytes. Memory never shrinks.
    pub fn resize(&mut self, size: u64) {
        let size = size as usize;
        if self.store.len() < size {
            self.store.resize(size, 0);
        }
    }

    pub fn set(&mut self, offset: u64, value: &[u8]) {
        if value.is_empty() {
            return;
        }
        let offset = offset as usize;
        debug_assert!(offset + value.len() <= self.store.len());
        self.store[offset..offset + value.len()].copy_from_slice(value);
    }

    pub fn set32(&mut self, offset: u64, value: U256) {
        let mut word = [0u8; 32];
        value.to_big_endian(&mut word);
        self.set(offset, &word);
    }

    pub fn get_word(&self, offset: u64) -> U256 {
        let offset = offset as usize;
        debug_assert!(offset + 32 <= self.store.len());
        U256::from_big_endian(&self.store[offset..offset + 32])
    }

    pub fn get_copy(&self, offset: u64, size: u64) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }
        let (offset, size) = (offset as usize, size as usize);
        debug_assert!(offset + size <= self.store.len());
        self.store[offset..offset + size].to_vec()
    }

    /// Copies `len` bytes from `src` to `dst`; the ranges may overlap.
    pub fn copy(&mut self, dst: u64, src: u64, len: u64) {
        if len == 0 {
            return;
        }
        let (dst, src, len) = (dst as usize, src as usize, len as usize);
        self.store.copy_within(src..src + len, dst);
    }

    pub fn data(&self) -> &[u8] {
        &self.store
    }

    pub(crate) fn last_gas_cost(&self) -> u64 {
        self.last_gas_cost
    }

    pub(crate) fn set_last_gas_cost(&mut self, cost: u64) {
        self.last_gas_cost = cost;
    }
}
