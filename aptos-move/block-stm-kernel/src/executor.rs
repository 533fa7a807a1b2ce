// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    config::BlockExecutorConfig,
    counters::{
        DEPENDENCY_COUNT, INTERRUPTED_EXECUTION_COUNT, PARALLEL_EXECUTION_SECONDS,
        SPECULATIVE_ABORT_COUNT, TASK_EXECUTE_SECONDS, TASK_VALIDATE_SECONDS,
    },
    errors::{code_invariant_error, BlockExecutionError, BlockExecutionResult, PanicError},
    mvmemory::{Incarnation, MVMemory},
    status::{RemovalMode, TaskStatusManager, TxnIndex},
    task::{ExecutionStatus, ExecutorTask, Transaction, TransactionOutput},
    view::{validate_reads, ReadDescriptor, SequentialView, SpeculativeView, StateView},
};
use aptos_interruptible_vm::{CancellationHandle, Canceller, InterruptionLedger};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use rayon::{ThreadPool, Yield};
use std::{
    collections::{BTreeMap, BTreeSet},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info};

/// Outputs of a block in transaction order, and the state it leaves behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockOutput<O, K, V> {
    pub outputs: Vec<O>,
    pub final_writes: BTreeMap<K, V>,
}

impl<O, K, V> BlockOutput<O, K, V> {
    fn empty() -> Self {
        Self {
            outputs: vec![],
            final_writes: BTreeMap::new(),
        }
    }
}

enum AttemptOutcome<K, O, Err> {
    Executed {
        output: O,
        reads: Vec<ReadDescriptor<K>>,
    },
    Aborted(Err),
    /// Read a value of the given lower transaction while it was being re-executed.
    Dependency(TxnIndex),
    Interrupted,
}

struct AttemptResult<K, O, Err> {
    txn_idx: TxnIndex,
    incarnation: Incarnation,
    outcome: AttemptOutcome<K, O, Err>,
}

// How long an idle pool thread waits for a result before looking for work again.
const IDLE_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Waits for the next attempt result. On a rayon worker thread, pending jobs are run
/// while waiting, so a coordinator started from inside the pool never starves its
/// own attempts.
fn recv_attempt_result<R>(receiver: &Receiver<R>) -> Result<R, PanicError> {
    let closed = || code_invariant_error("attempt result channel closed");
    loop {
        match receiver.try_recv() {
            Ok(result) => return Ok(result),
            Err(TryRecvError::Disconnected) => return Err(closed()),
            Err(TryRecvError::Empty) => {},
        }
        match rayon::yield_now() {
            // Not a pool thread: nothing to help with.
            None => return receiver.recv().map_err(|_| closed()),
            Some(Yield::Executed) => {},
            Some(Yield::Idle) => match receiver.recv_timeout(IDLE_POLL_INTERVAL) {
                Ok(result) => return Ok(result),
                Err(RecvTimeoutError::Disconnected) => return Err(closed()),
                Err(RecvTimeoutError::Timeout) => {},
            },
        }
    }
}

/// Scheduling state of a parallel run. Lives on the coordinator thread only.
struct CoordinatorState<T: Transaction, O> {
    execution: TaskStatusManager,
    validation: TaskStatusManager,
    next_incarnation: Vec<Incarnation>,
    last_reads: Vec<Vec<ReadDescriptor<T::Key>>>,
    last_write_keys: Vec<BTreeSet<T::Key>>,
    outputs: Vec<Option<O>>,
    in_flight: BTreeMap<TxnIndex, Canceller>,
    num_attempts: usize,
}

impl<T, O> CoordinatorState<T, O>
where
    T: Transaction,
    O: TransactionOutput<Txn = T>,
{
    fn new(num_txns: usize) -> Self {
        Self {
            execution: TaskStatusManager::new(num_txns),
            validation: TaskStatusManager::new(num_txns),
            next_incarnation: vec![0; num_txns],
            last_reads: (0..num_txns).map(|_| Vec::new()).collect(),
            last_write_keys: (0..num_txns).map(|_| BTreeSet::new()).collect(),
            outputs: (0..num_txns).map(|_| None).collect(),
            in_flight: BTreeMap::new(),
            num_attempts: 0,
        }
    }

    fn start_attempt(&mut self, txn_idx: TxnIndex, canceller: Canceller) -> Incarnation {
        let incarnation = self.next_incarnation[txn_idx];
        self.next_incarnation[txn_idx] += 1;
        self.num_attempts += 1;
        self.in_flight.insert(txn_idx, canceller);
        incarnation
    }

    fn finish_attempt(
        &mut self,
        txn_idx: TxnIndex,
        incarnation: Incarnation,
    ) -> Result<(), PanicError> {
        if self.in_flight.remove(&txn_idx).is_none()
            || self.next_incarnation[txn_idx] != incarnation + 1
        {
            return Err(code_invariant_error(format!(
                "unexpected result of txn {} incarnation {}",
                txn_idx, incarnation
            )));
        }
        Ok(())
    }

    /// Cancels the in-flight attempts of every transaction above `txn_idx`.
    fn cancel_higher(&self, txn_idx: TxnIndex) {
        for canceller in self.in_flight.range(txn_idx + 1..).map(|(_, c)| c) {
            canceller.cancel();
        }
    }

    fn cancel_all(&self) {
        for canceller in self.in_flight.values() {
            canceller.cancel();
        }
    }

    fn on_executed(
        &mut self,
        txn_idx: TxnIndex,
        incarnation: Incarnation,
        output: O,
        reads: Vec<ReadDescriptor<T::Key>>,
        versioned_cache: &MVMemory<T::Key, T::Value>,
    ) -> Result<(), PanicError> {
        let mut write_keys = BTreeSet::new();
        for (key, value) in output.get_writes() {
            write_keys.insert(key.clone());
            versioned_cache.write(key, txn_idx, incarnation, value);
        }
        // Keys of the previous incarnation that are not written anymore.
        let prev_keys = std::mem::replace(&mut self.last_write_keys[txn_idx], write_keys);
        let write_keys = &self.last_write_keys[txn_idx];
        for key in prev_keys.difference(write_keys) {
            versioned_cache.delete(key, txn_idx);
        }
        let write_set_grew = write_keys.iter().any(|key| !prev_keys.contains(key));

        self.last_reads[txn_idx] = reads;
        self.outputs[txn_idx] = Some(output);

        self.execution.mark_complete(txn_idx)?;
        self.execution.remove_dependency(txn_idx);

        let revalidate = self.execution.get_revalidation_range(txn_idx + 1);
        for tx in std::iter::once(txn_idx).chain(revalidate) {
            self.validation.clear_complete(tx);
            self.validation.push_pending(tx);
        }

        if write_set_grew {
            self.cancel_higher(txn_idx);
        }
        Ok(())
    }

    fn on_dependency(&mut self, txn_idx: TxnIndex, blocker: TxnIndex) -> Result<(), PanicError> {
        if blocker >= txn_idx {
            return Err(code_invariant_error(format!(
                "txn {} depends on txn {} that is not lower",
                txn_idx, blocker
            )));
        }
        self.execution
            .clear_in_progress(txn_idx, RemovalMode::Strict)?;
        DEPENDENCY_COUNT.inc();
        if !self.execution.add_dependencies([blocker], txn_idx) {
            // The blocker finished in the meantime.
            self.execution.push_pending(txn_idx);
        }
        Ok(())
    }

    fn on_interrupted(&mut self, txn_idx: TxnIndex) -> Result<(), PanicError> {
        self.execution
            .clear_in_progress(txn_idx, RemovalMode::Strict)?;
        self.execution.push_pending(txn_idx);
        INTERRUPTED_EXECUTION_COUNT.inc();
        Ok(())
    }

    /// Marks the writes of `txn_idx` as estimates and schedules it for re-execution.
    fn abort(
        &mut self,
        txn_idx: TxnIndex,
        versioned_cache: &MVMemory<T::Key, T::Value>,
    ) -> Result<(), PanicError> {
        for key in &self.last_write_keys[txn_idx] {
            versioned_cache.mark_estimate(key, txn_idx)?;
        }
        self.execution.clear_complete(txn_idx);
        self.execution.push_pending(txn_idx);
        self.cancel_higher(txn_idx);
        SPECULATIVE_ABORT_COUNT.inc();
        debug!(txn_idx, "Speculative execution aborted");
        Ok(())
    }

    /// Validates, in order, every transaction whose prefix has finished executing.
    fn validate_ready(
        &mut self,
        versioned_cache: &MVMemory<T::Key, T::Value>,
    ) -> Result<(), PanicError> {
        while let Some(txn_idx) = self.validation.min_pending() {
            if self
                .execution
                .max_all_complete()
                .is_none_or(|max| txn_idx > max)
            {
                break;
            }
            self.validation.take_next_pending();

            let valid = {
                let _timer = TASK_VALIDATE_SECONDS.start_timer();
                validate_reads(versioned_cache, &self.last_reads[txn_idx], txn_idx)
            };
            if valid {
                self.validation.mark_complete(txn_idx)?;
            } else {
                self.validation
                    .clear_in_progress(txn_idx, RemovalMode::Strict)?;
                self.abort(txn_idx, versioned_cache)?;
            }
        }
        Ok(())
    }

    fn into_outputs(self) -> Result<Vec<O>, PanicError> {
        self.outputs
            .into_iter()
            .enumerate()
            .map(|(txn_idx, output)| {
                output.ok_or_else(|| {
                    code_invariant_error(format!("no output for committed txn {}", txn_idx))
                })
            })
            .collect()
    }
}

pub struct BlockExecutor<T, E, S> {
    // Maximum number of execution attempts in flight at any time.
    concurrency_level: usize,
    executor_thread_pool: Arc<ThreadPool>,
    ledger: Arc<InterruptionLedger>,
    phantom: PhantomData<(T, E, S)>,
}

impl<T, E, S> BlockExecutor<T, E, S>
where
    T: Transaction,
    E: ExecutorTask<Txn = T>,
    S: StateView<Key = T::Key, Value = T::Value>,
{
    /// The ledger may be shared across executors and blocks: it is keyed by task id.
    pub fn new(
        concurrency_level: usize,
        executor_thread_pool: Arc<ThreadPool>,
        ledger: Arc<InterruptionLedger>,
    ) -> Self {
        assert!(
            concurrency_level > 0,
            "Parallel execution concurrency level {} should be at least 1",
            concurrency_level
        );
        Self {
            concurrency_level,
            executor_thread_pool,
            ledger,
            phantom: PhantomData,
        }
    }

    pub fn from_config(
        config: &BlockExecutorConfig,
        executor_thread_pool: Arc<ThreadPool>,
    ) -> Self {
        Self::new(
            config.concurrency_level,
            executor_thread_pool,
            Arc::new(config.vm.interruption_ledger()),
        )
    }

    pub fn concurrency_level(&self) -> usize {
        self.concurrency_level
    }

    pub fn ledger(&self) -> &Arc<InterruptionLedger> {
        &self.ledger
    }

    pub fn execute_transactions_parallel(
        &self,
        executor_arguments: E::Argument,
        signature_verified_block: &[T],
        base_view: &S,
    ) -> BlockExecutionResult<BlockOutput<E::Output, T::Key, T::Value>, E::Error> {
        let _timer = PARALLEL_EXECUTION_SECONDS.start_timer();
        let num_txns = signature_verified_block.len();
        if num_txns == 0 {
            return Ok(BlockOutput::empty());
        }

        let executor = E::init(executor_arguments);
        let versioned_cache = MVMemory::new();
        let mut state = CoordinatorState::<T, E::Output>::new(num_txns);
        let (sender, receiver) = crossbeam_channel::unbounded();

        self.executor_thread_pool.in_place_scope(|s| {
            let mut coordinate = || -> BlockExecutionResult<(), E::Error> {
                loop {
                    state.validate_ready(&versioned_cache)?;
                    if state.validation.count_complete() == num_txns {
                        return Ok(());
                    }

                    while state.in_flight.len() < self.concurrency_level {
                        let Some(txn_idx) = state.execution.take_next_pending() else {
                            break;
                        };
                        let txn = &signature_verified_block[txn_idx];
                        let (handle, canceller) =
                            CancellationHandle::new(txn.task_id(), Arc::clone(&self.ledger));
                        let incarnation = state.start_attempt(txn_idx, canceller);

                        let sender = sender.clone();
                        let executor = &executor;
                        let versioned_cache = &versioned_cache;
                        s.spawn(move |_| {
                            let outcome = {
                                let _timer = TASK_EXECUTE_SECONDS.start_timer();
                                let mut view =
                                    SpeculativeView::new(versioned_cache, base_view, txn_idx);
                                let status = executor.execute_transaction(
                                    &mut view,
                                    txn,
                                    txn_idx,
                                    Some(&handle),
                                );
                                match (view.read_dependency(), status) {
                                    (Some(blocker), _) => AttemptOutcome::Dependency(blocker),
                                    (None, ExecutionStatus::Success(output)) => {
                                        AttemptOutcome::Executed {
                                            output,
                                            reads: view.take_reads(),
                                        }
                                    },
                                    (None, ExecutionStatus::Abort(err)) => {
                                        AttemptOutcome::Aborted(err)
                                    },
                                    (None, ExecutionStatus::Interrupted) => {
                                        AttemptOutcome::Interrupted
                                    },
                                }
                            };
                            // The receiver is gone once the block has failed.
                            let _ = sender.send(AttemptResult {
                                txn_idx,
                                incarnation,
                                outcome,
                            });
                        });
                    }

                    if state.in_flight.is_empty() {
                        return Err(code_invariant_error(format!(
                            "nothing in flight with {} of {} txns validated",
                            state.validation.count_complete(),
                            num_txns
                        ))
                        .into());
                    }

                    let AttemptResult {
                        txn_idx,
                        incarnation,
                        outcome,
                    } = recv_attempt_result(&receiver)?;
                    state.finish_attempt(txn_idx, incarnation)?;

                    match outcome {
                        AttemptOutcome::Executed { output, reads } => state.on_executed(
                            txn_idx,
                            incarnation,
                            output,
                            reads,
                            &versioned_cache,
                        )?,
                        AttemptOutcome::Aborted(err) => {
                            return Err(BlockExecutionError::FatalVMError(err));
                        },
                        AttemptOutcome::Dependency(blocker) => {
                            state.on_dependency(txn_idx, blocker)?
                        },
                        AttemptOutcome::Interrupted => state.on_interrupted(txn_idx)?,
                    }
                }
            };

            let ret = coordinate();
            if ret.is_err() {
                // Let the scope join quickly.
                state.cancel_all();
            }
            ret
        })?;

        info!(
            num_txns,
            num_attempts = state.num_attempts,
            "Parallel execution completed"
        );
        Ok(BlockOutput {
            outputs: state.into_outputs()?,
            final_writes: versioned_cache.into_final_writes(),
        })
    }

    pub fn execute_transactions_sequential(
        &self,
        executor_arguments: E::Argument,
        signature_verified_block: &[T],
        base_view: &S,
    ) -> BlockExecutionResult<BlockOutput<E::Output, T::Key, T::Value>, E::Error> {
        let executor = E::init(executor_arguments);
        let mut committed = BTreeMap::new();
        let mut outputs = Vec::with_capacity(signature_verified_block.len());

        for (idx, txn) in signature_verified_block.iter().enumerate() {
            let mut view = SequentialView::new(&committed, base_view);
            match executor.execute_transaction(&mut view, txn, idx, None) {
                ExecutionStatus::Success(output) => {
                    committed.extend(output.get_writes());
                    outputs.push(output);
                },
                ExecutionStatus::Abort(err) => {
                    return Err(BlockExecutionError::FatalVMError(err));
                },
                ExecutionStatus::Interrupted => {
                    return Err(code_invariant_error(format!(
                        "txn {} interrupted without a cancellation handle",
                        idx
                    ))
                    .into());
                },
            }
        }

        Ok(BlockOutput {
            outputs,
            final_writes: committed,
        })
    }

    pub fn execute_block(
        &self,
        executor_arguments: E::Argument,
        signature_verified_block: &[T],
        base_view: &S,
    ) -> BlockExecutionResult<BlockOutput<E::Output, T::Key, T::Value>, E::Error> {
        if self.concurrency_level > 1 && signature_verified_block.len() > 1 {
            self.execute_transactions_parallel(
                executor_arguments,
                signature_verified_block,
                base_view,
            )
        } else {
            self.execute_transactions_sequential(
                executor_arguments,
                signature_verified_block,
                base_view,
            )
        }
    }
}
