// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{status::TxnIndex, view::TransactionView};
use aptos_interruptible_vm::{CancellationHandle, TaskId};
use std::{fmt::Debug, hash::Hash};

/// The execution result of a transaction
#[derive(Debug)]
pub enum ExecutionStatus<T, E> {
    /// Transaction was executed successfully.
    Success(T),
    /// Transaction hit a none recoverable error during execution, halt the execution and propagate
    /// the error back to the caller.
    Abort(E),
    /// The attempt was stopped through its cancellation handle before it finished. The
    /// transaction is executed again.
    Interrupted,
}

/// Trait that defines a transaction that could be parallel executed by the scheduler. Each
/// transaction will write to a key value storage as their side effect.
pub trait Transaction: Sync + Send + 'static {
    type Key: PartialOrd + Ord + Send + Sync + Clone + Hash + Eq + Debug;
    type Value: Send + Sync + Clone + Debug + PartialEq;

    /// Identity under which attempts of this transaction are tracked by the
    /// interruption ledger.
    fn task_id(&self) -> TaskId;
}

/// Trait for single threaded transaction executor.
pub trait ExecutorTask: Sync {
    /// Type of transaction and its associated key and value.
    type Txn: Transaction;

    /// The output of a transaction. This should contain the side effect of this transaction.
    type Output: TransactionOutput<Txn = Self::Txn> + 'static;

    /// Type of error when the executor failed to process a transaction and needs to abort.
    type Error: Clone + Send + Sync + Debug + 'static;

    /// Type to intialize the single thread transaction executor. Copy and Sync are required because
    /// we will create an instance of executor on each individual thread.
    type Argument: Sync + Copy;

    /// Create an instance of the transaction executor.
    fn init(args: Self::Argument) -> Self;

    /// Execute a single transaction given the view of the current state. `cancel` is
    /// polled by the task; once raised, the task may return [`ExecutionStatus::Interrupted`].
    fn execute_transaction(
        &self,
        view: &mut impl TransactionView<
            Key = <Self::Txn as Transaction>::Key,
            Value = <Self::Txn as Transaction>::Value,
        >,
        txn: &Self::Txn,
        txn_idx: TxnIndex,
        cancel: Option<&CancellationHandle>,
    ) -> ExecutionStatus<Self::Output, Self::Error>;
}

/// Trait for execution result of a transaction.
pub trait TransactionOutput: Send + Sync + Debug {
    /// Type of transaction and its associated key and value.
    type Txn: Transaction;

    /// Get the side effect of a transaction from its output.
    fn get_writes(
        &self,
    ) -> Vec<(
        <Self::Txn as Transaction>::Key,
        <Self::Txn as Transaction>::Value,
    )>;
}
