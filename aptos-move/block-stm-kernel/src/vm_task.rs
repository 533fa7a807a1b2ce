// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Executor task running [`VMTransaction`]s on the interruptible interpreter.

use crate::{
    status::TxnIndex,
    task::{ExecutionStatus, ExecutorTask, Transaction, TransactionOutput},
    view::TransactionView,
};
use aptos_interruptible_vm::{
    CancellationHandle, Contract, DispatchTable, Host, Interpreter, InterpreterResult, TaskId,
    VMError, VMResult, U256,
};
use bytes::Bytes;
use std::collections::BTreeMap;
#[cfg(any(test, feature = "testing"))]
use std::time::Duration;
use tracing::debug;

/// A contract invocation: `code` is run with `input` and at most `gas_limit` gas.
#[derive(Clone, Debug)]
pub struct VMTransaction {
    pub task_id: TaskId,
    pub code: Bytes,
    pub input: Bytes,
    pub gas_limit: u64,
    pub read_only: bool,
}

impl VMTransaction {
    pub fn new(task_id: TaskId, code: impl Into<Bytes>, gas_limit: u64) -> Self {
        Self {
            task_id,
            code: code.into(),
            input: Bytes::new(),
            gas_limit,
            read_only: false,
        }
    }

    pub fn with_input(mut self, input: impl Into<Bytes>) -> Self {
        self.input = input.into();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

impl Transaction for VMTransaction {
    type Key = U256;
    type Value = U256;

    fn task_id(&self) -> TaskId {
        self.task_id
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    Success,
    Reverted,
    Failed(VMError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VMOutput {
    pub status: TxnStatus,
    pub output: Vec<u8>,
    pub gas_used: u64,
    /// Storage writes, empty unless the transaction succeeded.
    pub writes: Vec<(U256, U256)>,
}

impl TransactionOutput for VMOutput {
    type Txn = VMTransaction;

    fn get_writes(&self) -> Vec<(U256, U256)> {
        self.writes.clone()
    }
}

/// [`Host`] over a transaction view. Writes are buffered and served back to later
/// reads of the same transaction; unset slots read as zero.
pub struct ViewHost<'v, V> {
    view: &'v mut V,
    writes: BTreeMap<U256, U256>,
}

impl<'v, V> ViewHost<'v, V>
where
    V: TransactionView<Key = U256, Value = U256>,
{
    pub fn new(view: &'v mut V) -> Self {
        Self {
            view,
            writes: BTreeMap::new(),
        }
    }

    pub fn into_writes(self) -> BTreeMap<U256, U256> {
        self.writes
    }
}

impl<V> Host for ViewHost<'_, V>
where
    V: TransactionView<Key = U256, Value = U256>,
{
    fn sload(&mut self, key: &U256) -> VMResult<U256> {
        if let Some(value) = self.writes.get(key) {
            return Ok(*value);
        }
        self.view
            .read(key)
            .map(Option::unwrap_or_default)
            .map_err(|err| VMError::StateUnavailable(err.to_string()))
    }

    fn sstore(&mut self, key: U256, value: U256) -> VMResult<()> {
        self.writes.insert(key, value);
        Ok(())
    }
}

#[derive(Clone, Copy)]
pub struct VMTaskArgs<'a> {
    pub table: &'a DispatchTable,
    /// Pause before every instruction, to widen the window in which attempts can be
    /// cancelled.
    #[cfg(any(test, feature = "testing"))]
    pub opcode_delay: Option<Duration>,
}

impl<'a> VMTaskArgs<'a> {
    pub fn new(table: &'a DispatchTable) -> Self {
        Self {
            table,
            #[cfg(any(test, feature = "testing"))]
            opcode_delay: None,
        }
    }
}

pub struct VMExecutorTask<'a> {
    args: VMTaskArgs<'a>,
}

impl<'a> ExecutorTask for VMExecutorTask<'a> {
    type Argument = VMTaskArgs<'a>;
    type Error = VMError;
    type Output = VMOutput;
    type Txn = VMTransaction;

    fn init(args: Self::Argument) -> Self {
        Self { args }
    }

    fn execute_transaction(
        &self,
        view: &mut impl TransactionView<Key = U256, Value = U256>,
        txn: &VMTransaction,
        txn_idx: TxnIndex,
        cancel: Option<&CancellationHandle>,
    ) -> ExecutionStatus<VMOutput, VMError> {
        let mut host = ViewHost::new(view);
        let mut contract = Contract::new(txn.code.clone(), txn.gas_limit);

        let result = {
            #[allow(unused_mut)]
            let mut interpreter = Interpreter::new(self.args.table, &mut host);
            #[cfg(any(test, feature = "testing"))]
            if let Some(delay) = self.args.opcode_delay {
                interpreter = interpreter.with_opcode_delay(delay);
            }
            interpreter.run(&mut contract, txn.input.clone(), txn.read_only, cancel)
        };

        let gas_used = if result.keeps_remaining_gas() {
            txn.gas_limit - contract.gas()
        } else {
            txn.gas_limit
        };
        let output = match result {
            InterpreterResult::Success(output) => VMOutput {
                status: TxnStatus::Success,
                output,
                gas_used,
                writes: host.into_writes().into_iter().collect(),
            },
            InterpreterResult::Revert(output) => VMOutput {
                status: TxnStatus::Reverted,
                output,
                gas_used,
                writes: vec![],
            },
            InterpreterResult::Fault(err) => {
                debug!(txn_idx, task_id = %txn.task_id, error = %err, "Transaction failed");
                VMOutput {
                    status: TxnStatus::Failed(err),
                    output: vec![],
                    gas_used,
                    writes: vec![],
                }
            },
            InterpreterResult::Interrupted => return ExecutionStatus::Interrupted,
        };
        ExecutionStatus::Success(output)
    }
}
