// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Reference gas schedule, memory sizing and dynamic gas functions used by the
//! built-in instruction set.

use crate::{
    errors::{VMError, VMResult},
    memory::Memory,
    stack::Stack,
};
use primitive_types::U256;

pub const GAS_ZERO_STEP: u64 = 0;
pub const GAS_JUMPDEST: u64 = 1;
pub const GAS_QUICK_STEP: u64 = 2;
pub const GAS_FASTEST_STEP: u64 = 3;
pub const GAS_FAST_STEP: u64 = 5;
pub const GAS_MID_STEP: u64 = 8;
pub const GAS_SLOW_STEP: u64 = 10;
pub const GAS_SLOAD: u64 = 800;
pub const GAS_SSTORE: u64 = 5_000;

/// Linear coefficient of the memory expansion cost, per word.
pub const MEMORY_GAS: u64 = 3;
/// Divisor of the quadratic term of the memory expansion cost.
pub const QUAD_COEFF_DIV: u64 = 512;
/// Cost per word copied by MCOPY.
pub const COPY_GAS: u64 = 3;

// Largest memory size whose quadratic cost still fits in a u64.
const MAX_MEMORY_SIZE: u64 = 0x1F_FFFF_FFE0;

/// Number of 32-byte words needed to hold `size` bytes.
pub fn to_word_size(size: u64) -> u64 {
    if size > u64::MAX - 31 {
        return u64::MAX / 32 + 1;
    }
    (size + 31) / 32
}

/// Cost of growing `memory` to `new_size` bytes, relative to what was already paid.
/// Records the new total so the next expansion is charged only for the difference.
pub fn memory_gas_cost(memory: &mut Memory, new_size: u64) -> VMResult<u64> {
    if new_size == 0 {
        return Ok(0);
    }
    if new_size > MAX_MEMORY_SIZE {
        return Err(VMError::GasUintOverflow);
    }
    let words = to_word_size(new_size);
    if words * 32 <= memory.len() as u64 {
        return Ok(0);
    }
    let total = words * MEMORY_GAS + words * words / QUAD_COEFF_DIV;
    let fee = total - memory.last_gas_cost();
    memory.set_last_gas_cost(total);
    Ok(fee)
}

/// Memory end offset of an access of `len` bytes at `offset`. A zero length never
/// touches memory regardless of the offset.
fn memory_end(offset: &U256, len: &U256) -> VMResult<u64> {
    if len.is_zero() {
        return Ok(0);
    }
    let max = U256::from(u64::MAX);
    if *offset > max || *len > max {
        return Err(VMError::GasUintOverflow);
    }
    offset
        .low_u64()
        .checked_add(len.low_u64())
        .ok_or(VMError::GasUintOverflow)
}

fn memory_end_fixed(offset: &U256, len: u64) -> VMResult<u64> {
    memory_end(offset, &U256::from(len))
}

pub(crate) fn memory_mload(stack: &Stack) -> VMResult<u64> {
    memory_end_fixed(stack.back(0)?, 32)
}

pub(crate) fn memory_mstore(stack: &Stack) -> VMResult<u64> {
    memory_end_fixed(stack.back(0)?, 32)
}

pub(crate) fn memory_mstore8(stack: &Stack) -> VMResult<u64> {
    memory_end_fixed(stack.back(0)?, 1)
}

pub(crate) fn memory_return(stack: &Stack) -> VMResult<u64> {
    memory_end(stack.back(0)?, stack.back(1)?)
}

pub(crate) fn memory_mcopy(stack: &Stack) -> VMResult<u64> {
    let len = stack.back(2)?;
    let dst = memory_end(stack.back(0)?, len)?;
    let src = memory_end(stack.back(1)?, len)?;
    Ok(dst.max(src))
}

/// Dynamic gas of instructions whose only variable cost is memory expansion.
pub(crate) fn pure_memory_gas(_stack: &Stack, memory: &mut Memory, size: u64) -> VMResult<u64> {
    memory_gas_cost(memory, size)
}

pub(crate) fn gas_mcopy(stack: &Stack, memory: &mut Memory, size: u64) -> VMResult<u64> {
    let expansion = memory_gas_cost(memory, size)?;
    let len = stack.back(2)?;
    if *len > U256::from(u64::MAX) {
        return Err(VMError::GasUintOverflow);
    }
    to_word_size(len.low_u64())
        .checked_mul(COPY_GAS)
        .and_then(|copy| copy.checked_add(expansion))
        .ok_or(VMError::GasUintOverflow)
}
