// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

/*!
Optimistic parallel execution of a block of ordered transactions.

Transactions are executed speculatively, out of order and in parallel, on top of a
multi-version store ([`mvmemory::MVMemory`]). A single coordinator thread owns two
[`status::TaskStatusManager`]s, one for executions and one for validations, and is
the only place where scheduling decisions are made:

- the lowest pending transaction is handed to a worker together with a fresh
  [`aptos_interruptible_vm::CancellationHandle`];
- a transaction that reads a value an unfinished lower transaction is rewriting is
  withheld behind a dependency edge until that transaction completes;
- once every transaction up to some index has executed, their reads are validated
  in order. A failed validation turns the transaction's writes into estimates and
  re-executes it;
- in-flight attempts above a transaction whose writes changed are cancelled. The
  interpreter arbitrates every cancellation through the shared
  [`aptos_interruptible_vm::InterruptionLedger`], so a task is never interrupted on
  two consecutive requests.

The result equals executing the block sequentially in transaction order, which is
also what [`executor::BlockExecutor`] does when the concurrency level is 1.
*/

pub mod config;
pub mod counters;
pub mod errors;
pub mod executor;
pub mod mvmemory;
pub mod status;
pub mod task;
pub mod view;
pub mod vm_task;

#[cfg(test)]
mod unit_tests;

pub use crate::{
    config::BlockExecutorConfig,
    errors::{BlockExecutionError, BlockExecutionResult, PanicError},
    executor::{BlockExecutor, BlockOutput},
    status::{RemovalMode, TaskStatusManager, TxnIndex},
    task::{ExecutionStatus, ExecutorTask, Transaction, TransactionOutput},
    view::{ReadError, StateView, TransactionView},
    vm_task::{TxnStatus, VMExecutorTask, VMOutput, VMTaskArgs, VMTransaction},
};
