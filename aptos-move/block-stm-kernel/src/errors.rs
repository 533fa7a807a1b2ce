// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::counters::CODE_INVARIANT_ERROR_COUNT;
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Violated scheduler invariants. Never retried: the block is aborted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PanicError {
    #[error("{0}")]
    CodeInvariantError(String),
}

/// Logging is bottlenecked in this constructor.
pub fn code_invariant_error<M: fmt::Display>(message: M) -> PanicError {
    let msg = format!("Code invariant broken: {}", message);
    error!("{}", msg);
    CODE_INVARIANT_ERROR_COUNT.inc();
    PanicError::CodeInvariantError(msg)
}

/// If an unrecoverable error occurs during block execution, it is propagated back to
/// the caller and the block is aborted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockExecutionError<E> {
    /// unrecoverable BlockSTM error
    FatalBlockExecutorError(PanicError),
    /// unrecoverable VM error
    FatalVMError(E),
}

pub type BlockExecutionResult<T, E> = Result<T, BlockExecutionError<E>>;

impl<E> From<PanicError> for BlockExecutionError<E> {
    fn from(err: PanicError) -> Self {
        BlockExecutionError::FatalBlockExecutorError(err)
    }
}
