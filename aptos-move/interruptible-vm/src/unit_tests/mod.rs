// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    counters::OPCODE_INTERRUPT_COUNT,
    dispatch_table::{DispatchTable, Operation, Ruleset},
    errors::{VMError, VMResult},
    host::InMemoryHost,
    interpreter::{CallContext, Interpreter, InterpreterResult, ScopeContext, Step},
    interruption::{CancellationHandle, InterruptionLedger, TaskId},
    opcodes::OpCode,
    tracer::{LogTracer, StepRecorder},
    Contract,
};
use bytes::Bytes;
use primitive_types::U256;
use proptest::{collection::vec, prelude::*};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

const GAS: u64 = 10_000;

fn word(value: u64) -> Vec<u8> {
    let mut word = [0u8; 32];
    U256::from(value).to_big_endian(&mut word);
    word.to_vec()
}

fn run(
    table: &DispatchTable,
    code: &[u8],
    read_only: bool,
) -> (InterpreterResult, u64, InMemoryHost) {
    let mut host = InMemoryHost::new();
    let mut contract = Contract::new(code.to_vec(), GAS);
    let result = {
        let mut interpreter = Interpreter::new(table, &mut host);
        let result = interpreter.run(&mut contract, Bytes::new(), read_only, None);
        assert_eq!(interpreter.call_context(), CallContext::default());
        result
    };
    (result, contract.gas(), host)
}

#[test]
fn empty_code_succeeds_immediately() {
    let (result, gas, host) = run(&DispatchTable::default(), &[], false);
    assert_eq!(result, InterpreterResult::Success(vec![]));
    assert_eq!(gas, GAS);
    assert!(host.storage().is_empty());
}

#[test]
fn add_and_return() {
    // PUSH1 2 PUSH1 3 ADD PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
    let code = [
        0x60, 0x02, 0x60, 0x03, 0x01, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
    ];
    let (result, gas, _) = run(&DispatchTable::default(), &code, false);
    assert_eq!(result, InterpreterResult::Success(word(5)));
    // Five pushes, ADD and MSTORE at 3 each, plus one word of memory.
    assert_eq!(GAS - gas, 24);
}

#[test]
fn stack_underflow_is_detected_before_gas_is_charged() {
    let (result, gas, _) = run(&DispatchTable::default(), &[OpCode::ADD.0], false);
    assert_eq!(
        result,
        InterpreterResult::Fault(VMError::StackUnderflow {
            stack_len: 0,
            required: 2
        })
    );
    assert_eq!(gas, GAS);
    assert!(!result.keeps_remaining_gas());
}

#[test]
fn stack_overflow() {
    // JUMPDEST PUSH0 PUSH1 0 JUMP: grows the stack by one word per iteration.
    let mut host = InMemoryHost::new();
    let table = DispatchTable::default();
    let mut contract = Contract::new(vec![0x5b, 0x5f, 0x60, 0x00, 0x56], u64::MAX);
    let result = Interpreter::new(&table, &mut host).run(&mut contract, Bytes::new(), false, None);
    assert_eq!(
        result,
        InterpreterResult::Fault(VMError::StackOverflow {
            stack_len: 1024,
            limit: 1023
        })
    );
}

#[test]
fn out_of_gas() {
    let mut host = InMemoryHost::new();
    let table = DispatchTable::default();
    let mut contract = Contract::new(vec![0x60, 0x01], 2);
    let result = Interpreter::new(&table, &mut host).run(&mut contract, Bytes::new(), false, None);
    assert_eq!(result, InterpreterResult::Fault(VMError::OutOfGas));
    assert_eq!(result.into_result(), Err(VMError::OutOfGas));
}

#[test]
fn undefined_and_invalid_opcodes() {
    let table = DispatchTable::default();
    let (result, _, _) = run(&table, &[0x0c], false);
    assert_eq!(result, InterpreterResult::Fault(VMError::InvalidOpcode(0x0c)));
    let (result, _, _) = run(&table, &[OpCode::INVALID.0], false);
    assert_eq!(result, InterpreterResult::Fault(VMError::InvalidOpcode(0xfe)));
}

#[test]
fn jumps_must_land_on_jumpdest() {
    let table = DispatchTable::default();
    // PUSH1 4 JUMP INVALID JUMPDEST STOP
    let (result, _, _) = run(&table, &[0x60, 0x04, 0x56, 0xfe, 0x5b, 0x00], false);
    assert_eq!(result, InterpreterResult::Success(vec![]));
    // PUSH1 3 JUMP INVALID
    let (result, _, _) = run(&table, &[0x60, 0x03, 0x56, 0xfe], false);
    assert_eq!(
        result,
        InterpreterResult::Fault(VMError::InvalidJump(U256::from(3)))
    );
}

#[test]
fn revert_keeps_gas_and_depends_on_ruleset() {
    // PUSH1 0 PUSH1 0 REVERT
    let code = [0x60, 0x00, 0x60, 0x00, 0xfd];
    let (result, gas, _) = run(&DispatchTable::default(), &code, false);
    assert_eq!(result, InterpreterResult::Revert(vec![]));
    assert!(result.keeps_remaining_gas());
    assert_eq!(gas, GAS - 6);
    assert_eq!(result.into_result(), Err(VMError::ExecutionReverted));

    let (result, _, _) = run(&DispatchTable::new(Ruleset::Frontier, &[]), &code, false);
    assert_eq!(result, InterpreterResult::Fault(VMError::InvalidOpcode(0xfd)));
}

#[test]
fn feature_overrides_enable_instructions() {
    // PUSH0 STOP
    let code = [0x5f, 0x00];
    let (result, _, _) = run(&DispatchTable::new(Ruleset::Frontier, &[]), &code, false);
    assert_eq!(result, InterpreterResult::Fault(VMError::InvalidOpcode(0x5f)));
    let (result, _, _) = run(&DispatchTable::new(Ruleset::Frontier, &[3855]), &code, false);
    assert_eq!(result, InterpreterResult::Success(vec![]));
}

#[test]
fn storage_round_trip_and_write_protection() {
    // PUSH1 42 PUSH1 1 SSTORE PUSH1 1 SLOAD PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
    let code = [
        0x60, 0x2a, 0x60, 0x01, 0x55, 0x60, 0x01, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60,
        0x00, 0xf3,
    ];
    let table = DispatchTable::default();
    let (result, _, host) = run(&table, &code, false);
    assert_eq!(result, InterpreterResult::Success(word(42)));
    assert_eq!(
        host.into_storage(),
        BTreeMap::from([(U256::from(1), U256::from(42))])
    );

    let (result, gas, host) = run(&table, &code, true);
    assert_eq!(result, InterpreterResult::Fault(VMError::WriteProtection));
    // The write protection check runs inside the effect, after SSTORE was paid for.
    assert!(gas < GAS);
    assert!(host.storage().is_empty());
}

#[test]
fn mcopy_and_calldata() {
    // PUSH1 0 CALLDATALOAD PUSH1 0 MSTORE
    // PUSH1 32 PUSH1 0 PUSH1 32 MCOPY
    // PUSH1 64 PUSH1 0 RETURN
    let code = [
        0x60, 0x00, 0x35, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0x60, 0x20, 0x5e, 0x60,
        0x40, 0x60, 0x00, 0xf3,
    ];
    let table = DispatchTable::default();
    let mut host = InMemoryHost::new();
    let mut contract = Contract::new(code.to_vec(), GAS);
    let input = Bytes::from(word(7));
    let result = Interpreter::new(&table, &mut host).run(&mut contract, input, false, None);
    assert_eq!(result, InterpreterResult::Success([word(7), word(7)].concat()));
}

#[test]
fn push_immediates_are_right_padded() {
    // PUSH2 0xab, cut off by the end of the code; the implicit STOP follows.
    let mut host = InMemoryHost::new();
    let table = DispatchTable::default();
    let mut recorder = StepRecorder::default();
    let mut contract = Contract::new(vec![0x61, 0xab], GAS);
    let result = Interpreter::new(&table, &mut host)
        .with_tracer(&mut recorder)
        .run(&mut contract, Bytes::new(), false, None);
    assert_eq!(result, InterpreterResult::Success(vec![]));
    assert_eq!(recorder.steps.len(), 2);
    assert_eq!(recorder.steps[1].op, OpCode::STOP);
    assert_eq!(recorder.steps[1].stack_len, 1);
}

#[test]
fn log_tracer_does_not_change_the_outcome() {
    let table = DispatchTable::default();
    // PUSH1 2 PUSH1 3 ADD PUSH1 0 SSTORE ADD: the second ADD underflows.
    let code = [0x60, 0x02, 0x60, 0x03, 0x01, 0x60, 0x00, 0x55, 0x01];
    let (expected, expected_gas, _) = run(&table, &code, false);
    assert_eq!(
        expected,
        InterpreterResult::Fault(VMError::StackUnderflow {
            stack_len: 0,
            required: 2,
        })
    );

    let mut host = InMemoryHost::new();
    let mut tracer = LogTracer;
    let mut contract = Contract::new(code.to_vec(), GAS);
    let result = Interpreter::new(&table, &mut host)
        .with_tracer(&mut tracer)
        .run(&mut contract, Bytes::new(), false, None);
    assert_eq!(result, expected);
    assert_eq!(contract.gas(), expected_gas);
}

const CHILD_STORE: &[u8] = &[0x60, 0x01, 0x60, 0x00, 0x55, 0x00];

/// Test instruction: pops a read-only flag, runs `CHILD_STORE` as a nested invocation
/// and pushes whether it succeeded and the call depth observed afterwards.
fn op_nested(
    _: &mut u64,
    interpreter: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> VMResult<Step> {
    let read_only = !scope.stack.pop()?.is_zero();
    let before = interpreter.call_context();
    let mut child = Contract::new(Bytes::from_static(CHILD_STORE), 10_000);
    let result = interpreter.run(&mut child, Bytes::new(), read_only, None);
    assert_eq!(interpreter.call_context(), before);
    let ok = matches!(result, InterpreterResult::Success(_));
    scope.stack.push(U256::from(ok as u64));
    scope
        .stack
        .push(U256::from(interpreter.call_context().depth() as u64));
    Ok(Step::Continue)
}

const NESTED: OpCode = OpCode(0xf1);

fn nested_table() -> DispatchTable {
    DispatchTable::default().with_operation(NESTED, Operation::new(op_nested, 0, 1, 2))
}

#[test]
fn nested_read_only_flag_is_cleared_by_its_setter() {
    // PUSH1 1 NESTED PUSH1 0 MSTORE PUSH1 32 MSTORE PUSH1 7 PUSH1 5 SSTORE
    // PUSH1 64 PUSH1 0 RETURN
    let code = [
        0x60, 0x01, 0xf1, 0x60, 0x00, 0x52, 0x60, 0x20, 0x52, 0x60, 0x07, 0x60, 0x05, 0x55,
        0x60, 0x40, 0x60, 0x00, 0xf3,
    ];
    let (result, _, host) = run(&nested_table(), &code, false);
    // Depth 1 after the nested run returned, and the read-only child failed.
    assert_eq!(result, InterpreterResult::Success([word(1), word(0)].concat()));
    // The outer invocation could still write afterwards.
    assert_eq!(
        host.into_storage(),
        BTreeMap::from([(U256::from(5), U256::from(7))])
    );
}

#[test]
fn nested_invocation_cannot_clear_outer_read_only() {
    // PUSH1 0 NESTED PUSH1 0 MSTORE PUSH1 32 MSTORE PUSH1 64 PUSH1 0 RETURN
    let code = [
        0x60, 0x00, 0xf1, 0x60, 0x00, 0x52, 0x60, 0x20, 0x52, 0x60, 0x40, 0x60, 0x00, 0xf3,
    ];
    let (result, _, host) = run(&nested_table(), &code, true);
    assert_eq!(result, InterpreterResult::Success([word(1), word(0)].concat()));
    assert!(host.storage().is_empty());
}

#[test]
fn nested_writable_child_succeeds() {
    // PUSH1 0 NESTED STOP
    let (result, _, host) = run(&nested_table(), &[0x60, 0x00, 0xf1, 0x00], false);
    assert_eq!(result, InterpreterResult::Success(vec![]));
    assert_eq!(
        host.into_storage(),
        BTreeMap::from([(U256::zero(), U256::one())])
    );
}

#[test]
fn raised_cancellation_alternates_between_interrupt_and_exempt() {
    let ledger = Arc::new(InterruptionLedger::default());
    let table = DispatchTable::default();
    let task_id = TaskId::from(11);
    // PUSH1 1 PUSH1 2 ADD STOP
    let code = [0x60, 0x01, 0x60, 0x02, 0x01, 0x00];
    let interrupts_before = OPCODE_INTERRUPT_COUNT.get();

    let attempt = |host: &mut InMemoryHost, recorder: &mut StepRecorder| {
        let (handle, canceller) = CancellationHandle::new(task_id, ledger.clone());
        canceller.cancel();
        let mut contract = Contract::new(code.to_vec(), GAS);
        Interpreter::new(&table, host)
            .with_tracer(recorder)
            .run(&mut contract, Bytes::new(), false, Some(&handle))
    };

    // First attempt stops before its first instruction and leaves a marker.
    let mut recorder = StepRecorder::default();
    assert_eq!(
        attempt(&mut InMemoryHost::new(), &mut recorder),
        InterpreterResult::Interrupted
    );
    assert!(recorder.steps.is_empty());
    assert!(ledger.contains(&task_id));

    // The retry is exempted once, then interrupted at the next boundary.
    let mut recorder = StepRecorder::default();
    assert_eq!(
        attempt(&mut InMemoryHost::new(), &mut recorder),
        InterpreterResult::Interrupted
    );
    assert_eq!(recorder.steps.len(), 1);
    assert!(recorder.faults.is_empty());
    assert!(ledger.contains(&task_id));
    assert!(OPCODE_INTERRUPT_COUNT.get() >= interrupts_before + 2);
}

#[test]
fn exempted_retry_of_a_single_instruction_completes() {
    let ledger = Arc::new(InterruptionLedger::new(16));
    let table = DispatchTable::default();
    let task_id = TaskId::from(12);
    let mut host = InMemoryHost::new();

    for expected in [InterpreterResult::Interrupted, InterpreterResult::Success(vec![])] {
        let (handle, canceller) = CancellationHandle::new(task_id, ledger.clone());
        canceller.cancel();
        let mut contract = Contract::new(vec![OpCode::STOP.0], GAS);
        let mut interpreter = Interpreter::new(&table, &mut host);
        let result = interpreter.run(&mut contract, Bytes::new(), false, Some(&handle));
        assert_eq!(result, expected);
        assert_eq!(interpreter.call_context(), CallContext::default());
    }
    assert!(ledger.is_empty());
}

#[test]
fn unraised_handle_never_touches_ledger() {
    let ledger = Arc::new(InterruptionLedger::new(16));
    let (handle, _canceller) = CancellationHandle::new(TaskId::from(13), ledger.clone());
    let table = DispatchTable::default();
    let mut host = InMemoryHost::new();
    let mut contract = Contract::new(vec![0x60, 0x01, 0x50, 0x00], GAS);
    let result =
        Interpreter::new(&table, &mut host).run(&mut contract, Bytes::new(), false, Some(&handle));
    assert_eq!(result, InterpreterResult::Success(vec![]));
    assert!(ledger.is_empty());
}

#[test]
fn delayed_run_is_interrupted_from_another_thread() {
    let ledger = Arc::new(InterruptionLedger::new(16));
    let (handle, canceller) = CancellationHandle::new(TaskId::from(14), ledger);
    let table = DispatchTable::default();
    let mut host = InMemoryHost::new();
    // JUMPDEST PUSH1 0 JUMP: loops until gas runs out.
    let mut contract = Contract::new(vec![0x5b, 0x60, 0x00, 0x56], u64::MAX);

    let canceller_thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        canceller.cancel();
    });
    let result = Interpreter::new(&table, &mut host)
        .with_opcode_delay(Duration::from_micros(100))
        .run(&mut contract, Bytes::new(), false, Some(&handle));
    canceller_thread.join().unwrap();
    assert_eq!(result, InterpreterResult::Interrupted);
}

#[test]
fn tracer_reports_faults_by_phase() {
    let table = DispatchTable::default();
    let mut host = InMemoryHost::new();

    // Failing before the step is traced: reported through capture_state.
    let mut recorder = StepRecorder::default();
    let mut contract = Contract::new(vec![OpCode::ADD.0], GAS);
    Interpreter::new(&table, &mut host)
        .with_tracer(&mut recorder)
        .run(&mut contract, Bytes::new(), false, None);
    assert_eq!(recorder.steps.len(), 1);
    assert!(recorder.steps[0].error.is_some());
    assert!(recorder.faults.is_empty());

    // Failing inside the effect: traced normally, then reported through capture_fault.
    let mut recorder = StepRecorder::default();
    let mut contract = Contract::new(vec![0x60, 0x03, 0x56], GAS);
    Interpreter::new(&table, &mut host)
        .with_tracer(&mut recorder)
        .run(&mut contract, Bytes::new(), false, None);
    assert_eq!(recorder.steps.len(), 2);
    assert!(recorder.steps.iter().all(|step| step.error.is_none()));
    assert_eq!(recorder.faults.len(), 1);
    assert_eq!(recorder.faults[0].op, OpCode::JUMP);
    assert_eq!(
        recorder.faults[0].error,
        Some(VMError::InvalidJump(U256::from(3)))
    );
    assert_eq!(recorder.faults[0].cost, 8);
    assert_eq!(recorder.faults[0].depth, 1);
}

proptest! {
    #[test]
    fn random_code_restores_call_context(
        code in vec(any::<u8>(), 0..96),
        read_only in any::<bool>(),
    ) {
        let table = nested_table();
        let mut host = InMemoryHost::new();
        let mut contract = Contract::new(code, GAS);
        let mut interpreter = Interpreter::new(&table, &mut host);
        let result = interpreter.run(&mut contract, Bytes::new(), read_only, None);
        prop_assert_eq!(interpreter.call_context(), CallContext::default());
        prop_assert!(contract.gas() <= GAS);
        prop_assert!(!result.is_interrupted());
    }
}
