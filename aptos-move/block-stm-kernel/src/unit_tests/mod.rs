// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    config::BlockExecutorConfig,
    counters::INTERRUPTED_EXECUTION_COUNT,
    errors::{BlockExecutionError, BlockExecutionResult},
    executor::{BlockExecutor, BlockOutput},
    status::TxnIndex,
    task::{ExecutionStatus, ExecutorTask, Transaction, TransactionOutput},
    view::TransactionView,
    vm_task::{TxnStatus, VMExecutorTask, VMTaskArgs, VMTransaction},
};
use aptos_interruptible_vm::{
    CancellationHandle, DispatchTable, InterruptionLedger, TaskId, VMError, U256,
};
use claims::{assert_err_eq, assert_ok};
use proptest::{collection::vec, prelude::*};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use test_case::test_case;

fn thread_pool(num_threads: usize) -> Arc<ThreadPool> {
    Arc::new(
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("block_stm_test_{}", index))
            .build()
            .unwrap(),
    )
}

#[derive(Clone, Debug)]
struct MockTransaction {
    id: u64,
    reads: Vec<u32>,
    writes: Vec<u32>,
    abort: bool,
}

impl Transaction for MockTransaction {
    type Key = u32;
    type Value = u64;

    fn task_id(&self) -> TaskId {
        TaskId::from(self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct MockOutput {
    reads: Vec<Option<u64>>,
    writes: Vec<(u32, u64)>,
}

impl TransactionOutput for MockOutput {
    type Txn = MockTransaction;

    fn get_writes(&self) -> Vec<(u32, u64)> {
        self.writes.clone()
    }
}

/// Writes the sum of everything it read plus its own position to every key it writes.
struct MockTask;

impl ExecutorTask for MockTask {
    type Argument = ();
    type Error = String;
    type Output = MockOutput;
    type Txn = MockTransaction;

    fn init(_args: ()) -> Self {
        MockTask
    }

    fn execute_transaction(
        &self,
        view: &mut impl TransactionView<Key = u32, Value = u64>,
        txn: &MockTransaction,
        txn_idx: TxnIndex,
        _cancel: Option<&CancellationHandle>,
    ) -> ExecutionStatus<MockOutput, String> {
        if txn.abort {
            return ExecutionStatus::Abort(format!("txn {} aborted", txn_idx));
        }
        let mut reads = Vec::with_capacity(txn.reads.len());
        for key in &txn.reads {
            match view.read(key) {
                Ok(value) => reads.push(value),
                // Discarded by the scheduler.
                Err(_) => {
                    return ExecutionStatus::Success(MockOutput {
                        reads,
                        writes: vec![],
                    })
                },
            }
        }
        let value = reads
            .iter()
            .flatten()
            .fold(txn_idx as u64 + 1, |acc, v| acc.wrapping_add(*v));
        ExecutionStatus::Success(MockOutput {
            reads,
            writes: txn.writes.iter().map(|key| (*key, value)).collect(),
        })
    }
}

type MockExecutor = BlockExecutor<MockTransaction, MockTask, BTreeMap<u32, u64>>;
type MockResult = BlockExecutionResult<BlockOutput<MockOutput, u32, u64>, String>;

fn mock_executor(concurrency_level: usize) -> MockExecutor {
    BlockExecutor::new(
        concurrency_level,
        thread_pool(concurrency_level),
        Arc::new(InterruptionLedger::default()),
    )
}

fn run_mock_parallel(block: &[MockTransaction], base: &BTreeMap<u32, u64>) -> MockResult {
    mock_executor(4).execute_transactions_parallel((), block, base)
}

fn run_mock_sequential(block: &[MockTransaction], base: &BTreeMap<u32, u64>) -> MockResult {
    mock_executor(1).execute_transactions_sequential((), block, base)
}

fn mock_txn(id: u64, reads: &[u32], writes: &[u32]) -> MockTransaction {
    MockTransaction {
        id,
        reads: reads.to_vec(),
        writes: writes.to_vec(),
        abort: false,
    }
}

#[test]
fn empty_block() {
    let base = BTreeMap::new();
    let output = assert_ok!(run_mock_parallel(&[], &base));
    assert!(output.outputs.is_empty());
    assert!(output.final_writes.is_empty());
}

#[test]
fn read_write_chain() {
    let base = BTreeMap::from([(0, 10)]);
    let block: Vec<_> = (0..20).map(|i| mock_txn(i, &[0], &[0])).collect();

    let output = assert_ok!(run_mock_parallel(&block, &base));
    // Every transaction adds its position plus one to the running total.
    let expected = 10 + (1..=20).sum::<u64>();
    assert_eq!(output.final_writes, BTreeMap::from([(0, expected)]));
    assert_eq!(output, assert_ok!(run_mock_sequential(&block, &base)));
}

#[test]
fn independent_transactions() {
    let base = BTreeMap::new();
    let block: Vec<_> = (0..16)
        .map(|i| mock_txn(i, &[i as u32], &[i as u32]))
        .collect();
    let output = assert_ok!(run_mock_parallel(&block, &base));
    for (idx, out) in output.outputs.iter().enumerate() {
        assert_eq!(out.reads, vec![None]);
        assert_eq!(out.writes, vec![(idx as u32, idx as u64 + 1)]);
    }
}

#[test_case(1; "sequential")]
#[test_case(4; "parallel")]
fn abort_fails_the_block(concurrency_level: usize) {
    let base = BTreeMap::new();
    let mut block: Vec<_> = (0..8).map(|i| mock_txn(i, &[0], &[0])).collect();
    block[5].abort = true;

    assert_err_eq!(
        mock_executor(concurrency_level).execute_block((), &block, &base),
        BlockExecutionError::FatalVMError("txn 5 aborted".to_string())
    );
}

fn arb_mock_block(max_txns: usize) -> impl Strategy<Value = Vec<MockTransaction>> {
    vec((vec(0..6u32, 0..4), vec(0..6u32, 0..3)), 1..max_txns).prop_map(|txns| {
        txns.into_iter()
            .enumerate()
            .map(|(i, (reads, writes))| mock_txn(i as u64, &reads, &writes))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn mock_parallel_matches_sequential(
        block in arb_mock_block(40),
        base in proptest::collection::btree_map(0..6u32, any::<u64>(), 0..6),
    ) {
        let sequential = run_mock_sequential(&block, &base).unwrap();
        let parallel = run_mock_parallel(&block, &base).unwrap();
        prop_assert_eq!(parallel, sequential);
    }
}

//
// Blocks of VM transactions
//

const GAS_LIMIT: u64 = 100_000;

#[derive(Clone, Copy, Debug)]
enum Action {
    /// slot += delta
    Add { slot: u8, delta: u8 },
    /// to = from
    Copy { from: u8, to: u8 },
}

#[derive(Clone, Copy, Debug)]
enum Ending {
    Stop,
    Revert,
    Invalid,
}

fn assemble(actions: &[Action], ending: Ending) -> Vec<u8> {
    let mut code = vec![];
    for action in actions {
        match *action {
            // PUSH1 slot SLOAD PUSH1 delta ADD PUSH1 slot SSTORE
            Action::Add { slot, delta } => {
                code.extend([0x60, slot, 0x54, 0x60, delta, 0x01, 0x60, slot, 0x55])
            },
            // PUSH1 from SLOAD PUSH1 to SSTORE
            Action::Copy { from, to } => code.extend([0x60, from, 0x54, 0x60, to, 0x55]),
        }
    }
    match ending {
        Ending::Stop => code.push(0x00),
        // PUSH1 0 PUSH1 0 REVERT
        Ending::Revert => code.extend([0x60, 0x00, 0x60, 0x00, 0xfd]),
        Ending::Invalid => code.push(0xfe),
    }
    code
}

fn vm_txn(id: u64, actions: &[Action], ending: Ending) -> VMTransaction {
    VMTransaction::new(TaskId::from(id), assemble(actions, ending), GAS_LIMIT)
}

fn vm_executor<'a>(
    concurrency_level: usize,
) -> BlockExecutor<VMTransaction, VMExecutorTask<'a>, BTreeMap<U256, U256>> {
    BlockExecutor::new(
        concurrency_level,
        thread_pool(concurrency_level),
        Arc::new(InterruptionLedger::default()),
    )
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (0..4u8, any::<u8>()).prop_map(|(slot, delta)| Action::Add { slot, delta }),
        1 => (0..4u8, 0..4u8).prop_map(|(from, to)| Action::Copy { from, to }),
    ]
}

fn arb_ending() -> impl Strategy<Value = Ending> {
    prop_oneof![
        8 => Just(Ending::Stop),
        1 => Just(Ending::Revert),
        1 => Just(Ending::Invalid),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn vm_parallel_matches_sequential(
        txns in vec((vec(arb_action(), 1..5), arb_ending()), 1..24),
    ) {
        let block: Vec<_> = txns
            .iter()
            .enumerate()
            .map(|(i, (actions, ending))| vm_txn(i as u64, actions, *ending))
            .collect();
        let base = BTreeMap::from([(U256::from(1u64), U256::from(1000u64))]);
        let table = DispatchTable::default();

        let sequential = vm_executor(1)
            .execute_transactions_sequential(VMTaskArgs::new(&table), &block, &base)
            .unwrap();
        let parallel = vm_executor(4)
            .execute_transactions_parallel(VMTaskArgs::new(&table), &block, &base)
            .unwrap();
        prop_assert_eq!(parallel, sequential);
    }
}

#[test]
fn vm_block_statuses() {
    let table = DispatchTable::default();
    let add = [Action::Add { slot: 0, delta: 1 }];
    let block = vec![
        vm_txn(0, &add, Ending::Stop),
        vm_txn(1, &add, Ending::Revert),
        vm_txn(2, &add, Ending::Invalid),
        vm_txn(3, &add, Ending::Stop),
        VMTransaction::new(TaskId::from(4), assemble(&add, Ending::Stop), GAS_LIMIT).read_only(),
    ];
    let base = BTreeMap::new();

    let output = assert_ok!(vm_executor(4).execute_block(VMTaskArgs::new(&table), &block, &base));
    let statuses: Vec<_> = output.outputs.iter().map(|o| o.status.clone()).collect();
    assert_eq!(statuses, vec![
        TxnStatus::Success,
        TxnStatus::Reverted,
        TxnStatus::Failed(VMError::InvalidOpcode(0xfe)),
        TxnStatus::Success,
        TxnStatus::Failed(VMError::WriteProtection),
    ]);
    assert_eq!(output.outputs[2].gas_used, GAS_LIMIT);
    assert_eq!(
        output.final_writes,
        BTreeMap::from([(U256::zero(), U256::from(2u64))])
    );
}

#[test]
fn interrupted_attempts_converge() {
    let table = DispatchTable::default();
    // PUSH1 0 POP, repeated to keep the higher transactions busy.
    let spin: Vec<u8> = std::iter::repeat([0x60, 0x00, 0x50])
        .take(20)
        .flatten()
        .collect();
    let mut block = vec![vm_txn(0, &[Action::Add { slot: 0, delta: 1 }], Ending::Stop)];
    for id in 1..6 {
        let mut code = spin.clone();
        code.extend(assemble(&[Action::Add { slot: 0, delta: 2 }], Ending::Stop));
        block.push(VMTransaction::new(TaskId::from(id), code, GAS_LIMIT));
    }
    let base = BTreeMap::new();

    let sequential = assert_ok!(vm_executor(1).execute_transactions_sequential(
        VMTaskArgs::new(&table),
        &block,
        &base
    ));

    let interrupted_before = INTERRUPTED_EXECUTION_COUNT.get();
    let args = VMTaskArgs {
        opcode_delay: Some(Duration::from_millis(1)),
        ..VMTaskArgs::new(&table)
    };
    let parallel = assert_ok!(vm_executor(4).execute_transactions_parallel(args, &block, &base));

    assert_eq!(parallel, sequential);
    assert_eq!(
        parallel.final_writes,
        BTreeMap::from([(U256::zero(), U256::from(11u64))])
    );
    assert!(INTERRUPTED_EXECUTION_COUNT.get() > interrupted_before);
}

#[test]
fn executor_from_config() {
    let config = BlockExecutorConfig {
        concurrency_level: 2,
        ..Default::default()
    };
    let executor: BlockExecutor<MockTransaction, MockTask, BTreeMap<u32, u64>> =
        BlockExecutor::from_config(&config, thread_pool(2));
    assert_eq!(executor.concurrency_level(), 2);
    assert_eq!(
        executor.ledger().capacity(),
        config.vm.interrupted_txn_cache_size
    );

    let base = BTreeMap::new();
    let block: Vec<_> = (0..4).map(|i| mock_txn(i, &[1], &[1])).collect();
    let output = assert_ok!(executor.execute_block((), &block, &base));
    assert_eq!(output.final_writes, BTreeMap::from([(1, 1 + 2 + 3 + 4)]));
}

#[test_case(1; "single thread")]
#[test_case(2; "two threads")]
fn execute_block_from_inside_the_pool(num_threads: usize) {
    let pool = thread_pool(num_threads);
    let executor: MockExecutor = BlockExecutor::new(
        4,
        Arc::clone(&pool),
        Arc::new(InterruptionLedger::default()),
    );
    let base = BTreeMap::new();
    let block: Vec<_> = (0..8).map(|i| mock_txn(i, &[0], &[0])).collect();

    let output = assert_ok!(pool.install(|| executor.execute_block((), &block, &base)));
    assert_eq!(output.final_writes, BTreeMap::from([(0, (1..=8).sum::<u64>())]));
    assert_eq!(output, assert_ok!(run_mock_sequential(&block, &base)));
}
