// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use primitive_types::U256;
use thiserror::Error;

/// Faults that terminate a run of the interpreter.
///
/// Every variant except [`VMError::ExecutionReverted`] must be treated by callers as
/// "revert and consume all remaining gas". A revert keeps the gas that was left.
/// [`VMError::Interrupted`] is not a bytecode fault at all: it reports a cooperative
/// cancellation back to whoever scheduled the attempt.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VMError {
    #[error("stack underflow ({stack_len} <=> {required})")]
    StackUnderflow { stack_len: usize, required: usize },
    #[error("stack limit reached {stack_len} ({limit})")]
    StackOverflow { stack_len: usize, limit: usize },
    #[error("out of gas")]
    OutOfGas,
    #[error("gas uint64 overflow")]
    GasUintOverflow,
    #[error("execution reverted")]
    ExecutionReverted,
    #[error("execution interrupted")]
    Interrupted,
    #[error("invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),
    #[error("invalid jump destination: {0}")]
    InvalidJump(U256),
    #[error("write protection")]
    WriteProtection,
    /// The host refused a state access, e.g. because the value is being rewritten
    /// by an unfinished earlier transaction.
    #[error("state unavailable: {0}")]
    StateUnavailable(String),
}

impl VMError {
    /// Short, stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            VMError::StackUnderflow { .. } => "stack_underflow",
            VMError::StackOverflow { .. } => "stack_overflow",
            VMError::OutOfGas => "out_of_gas",
            VMError::GasUintOverflow => "gas_uint_overflow",
            VMError::ExecutionReverted => "execution_reverted",
            VMError::Interrupted => "interrupted",
            VMError::InvalidOpcode(_) => "invalid_opcode",
            VMError::InvalidJump(_) => "invalid_jump",
            VMError::WriteProtection => "write_protection",
            VMError::StateUnavailable(_) => "state_unavailable",
        }
    }

    /// Whether the caller may refund the gas left over when this error ended the run.
    pub fn keeps_remaining_gas(&self) -> bool {
        matches!(self, VMError::ExecutionReverted)
    }
}

pub type VMResult<T> = Result<T, VMError>;
