// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::errors::{VMError, VMResult};
use primitive_types::U256;

/// Maximum number of words on the operand stack.
pub const STACK_LIMIT: usize = 1024;

/// Operand stack of a single invocation. The interpreter validates the depth against
/// the operation's bounds before running it, so the checks here only guard against
/// inconsistent dispatch table entries.
#[derive(Clone, Debug, Default)]
pub struct Stack {
    data: Vec<U256>,
}

impl Stack {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(16),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, value: U256) {
        self.data.push(value);
    }

    pub fn pop(&mut self) -> VMResult<U256> {
        self.data.pop().ok_or(VMError::StackUnderflow {
            stack_len: 0,
            required: 1,
        })
    }

    /// Returns the n-th item from the top (0 is the top).
    pub fn back(&self, n: usize) -> VMResult<&U256> {
        let len = self.data.len();
        if n >= len {
            return Err(VMError::StackUnderflow {
                stack_len: len,
                required: n + 1,
            });
        }
        Ok(&self.data[len - 1 - n])
    }

    /// Duplicates the n-th item (1-based) onto the top.
    pub fn dup(&mut self, n: usize) -> VMResult<()> {
        let value = *self.back(n - 1)?;
        self.data.push(value);
        Ok(())
    }

    /// Swaps the top with the item n positions below it.
    pub fn swap(&mut self, n: usize) -> VMResult<()> {
        let len = self.data.len();
        if n >= len {
            return Err(VMError::StackUnderflow {
                stack_len: len,
                required: n + 1,
            });
        }
        self.data.swap(len - 1, len - 1 - n);
        Ok(())
    }

    pub fn data(&self) -> &[U256] {
        &self.data
    }
}
