// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The interpreter loop.
//!
//! One [`Interpreter`] serves a single task attempt. It owns the [`CallContext`] shared
//! by the outermost invocation and every nested one started by an instruction, so the
//! call depth and the read-only flag travel with the attempt instead of living in
//! global state.
//!
//! Cancellation is cooperative. Before each instruction the loop looks at the
//! attempt's [`CancellationHandle`]; a raised signal is arbitrated by the shared
//! [`InterruptionLedger`](crate::interruption::InterruptionLedger), which either stops
//! the run with [`InterpreterResult::Interrupted`] or lets the instruction proceed.

use crate::{
    contract::Contract,
    counters::{INTERPRETER_FAULT_COUNT, OPCODE_INTERRUPT_COUNT},
    dispatch_table::{DispatchTable, Operation},
    errors::{VMError, VMResult},
    gas::to_word_size,
    host::Host,
    interruption::{CancellationHandle, InterruptDecision},
    memory::Memory,
    opcodes::OpCode,
    stack::Stack,
    tracer::{StepEvent, Tracer},
};
use bytes::Bytes;
#[cfg(any(test, feature = "testing"))]
use std::time::Duration;
use tracing::warn;

/// Call depth and static-call status of the running attempt.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CallContext {
    depth: usize,
    read_only: bool,
}

impl CallContext {
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }
}

/// What an instruction asks the loop to do next.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Step {
    /// Proceed to the next instruction.
    Continue,
    /// Proceed at the given program counter.
    Jump(u64),
    Halt(Halt),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Halt {
    Stop,
    Return(Vec<u8>),
    Revert(Vec<u8>),
}

/// Outcome of [`Interpreter::run`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InterpreterResult {
    Success(Vec<u8>),
    /// Explicit revert; state changes are discarded but the remaining gas is kept.
    Revert(Vec<u8>),
    /// Any other error; state changes are discarded and all remaining gas is consumed.
    Fault(VMError),
    /// Stopped by a cancellation request, nothing about the attempt is meaningful.
    Interrupted,
}

impl InterpreterResult {
    pub fn keeps_remaining_gas(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Revert(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    pub fn into_result(self) -> VMResult<Vec<u8>> {
        match self {
            Self::Success(output) => Ok(output),
            Self::Revert(_) => Err(VMError::ExecutionReverted),
            Self::Fault(err) => Err(err),
            Self::Interrupted => Err(VMError::Interrupted),
        }
    }
}

impl From<Halt> for InterpreterResult {
    fn from(halt: Halt) -> Self {
        match halt {
            Halt::Stop => Self::Success(Vec::new()),
            Halt::Return(output) => Self::Success(output),
            Halt::Revert(output) => Self::Revert(output),
        }
    }
}

/// Frame of the invocation an instruction runs in.
pub struct ScopeContext<'s> {
    pub stack: &'s mut Stack,
    pub memory: &'s mut Memory,
    pub contract: &'s mut Contract,
}

pub struct Interpreter<'a> {
    table: &'a DispatchTable,
    host: &'a mut (dyn Host + 'a),
    tracer: Option<&'a mut (dyn Tracer + 'a)>,
    call_context: CallContext,
    #[cfg(any(test, feature = "testing"))]
    opcode_delay: Option<Duration>,
}

impl<'a> Interpreter<'a> {
    pub fn new(table: &'a DispatchTable, host: &'a mut (dyn Host + 'a)) -> Self {
        Self {
            table,
            host,
            tracer: None,
            call_context: CallContext::default(),
            #[cfg(any(test, feature = "testing"))]
            opcode_delay: None,
        }
    }

    pub fn with_tracer(mut self, tracer: &'a mut (dyn Tracer + 'a)) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Sleeps before every instruction, so tests can keep an attempt in flight long
    /// enough to cancel it.
    #[cfg(any(test, feature = "testing"))]
    pub fn with_opcode_delay(mut self, delay: Duration) -> Self {
        self.opcode_delay = Some(delay);
        self
    }

    pub fn call_context(&self) -> CallContext {
        self.call_context
    }

    pub fn host_mut(&mut self) -> &mut (dyn Host + 'a) {
        &mut *self.host
    }

    /// Runs `contract` with `input` until it halts, faults or is interrupted through
    /// `cancel`. May be re-entered by instructions to start nested invocations; the
    /// call depth and read-only flag are restored on every exit.
    pub fn run(
        &mut self,
        contract: &mut Contract,
        input: Bytes,
        read_only: bool,
        cancel: Option<&CancellationHandle>,
    ) -> InterpreterResult {
        self.call_context.depth += 1;
        // Only the invocation that turned read-only on may turn it off again.
        let sets_read_only = read_only && !self.call_context.read_only;
        if sets_read_only {
            self.call_context.read_only = true;
        }

        let result = self.execute(contract, input, cancel);

        if sets_read_only {
            self.call_context.read_only = false;
        }
        self.call_context.depth -= 1;

        if let InterpreterResult::Fault(err) = &result {
            INTERPRETER_FAULT_COUNT
                .with_label_values(&[err.kind()])
                .inc();
        }
        result
    }

    fn execute(
        &mut self,
        contract: &mut Contract,
        input: Bytes,
        cancel: Option<&CancellationHandle>,
    ) -> InterpreterResult {
        contract.input = input;
        if contract.code().is_empty() {
            return InterpreterResult::Success(Vec::new());
        }

        let mut stack = Stack::new();
        let mut memory = Memory::new();
        let mut scope = ScopeContext {
            stack: &mut stack,
            memory: &mut memory,
            contract,
        };
        let mut pc = 0u64;

        loop {
            if let Some(handle) = cancel {
                if self.should_interrupt(handle, pc) {
                    return InterpreterResult::Interrupted;
                }
            }

            #[cfg(any(test, feature = "testing"))]
            if let Some(delay) = self.opcode_delay {
                std::thread::sleep(delay);
            }

            match self.step(&mut pc, &mut scope) {
                Ok(Step::Continue) => pc += 1,
                Ok(Step::Jump(dest)) => pc = dest,
                Ok(Step::Halt(halt)) => return halt.into(),
                Err(err) => return InterpreterResult::Fault(err),
            }
        }
    }

    fn should_interrupt(&self, handle: &CancellationHandle, pc: u64) -> bool {
        if !handle.is_cancellation_requested() {
            return false;
        }
        match handle.ledger().check(handle.task_id()) {
            InterruptDecision::Interrupt => {
                OPCODE_INTERRUPT_COUNT.inc();
                warn!(
                    task_id = %handle.task_id(),
                    pc,
                    depth = self.call_context.depth,
                    "Interpreter interrupted"
                );
                true
            },
            InterruptDecision::Exempt => false,
        }
    }

    fn step(&mut self, pc: &mut u64, scope: &mut ScopeContext<'_>) -> VMResult<Step> {
        let op = scope.contract.get_op(*pc);
        let gas = scope.contract.gas();
        let mut cost = 0;

        let operation = match self.charge(op, scope, &mut cost) {
            Ok(operation) => operation,
            Err(err) => {
                self.trace(false, *pc, op, gas, cost, scope, Some(&err));
                return Err(err);
            },
        };
        self.trace(false, *pc, op, gas, cost, scope, None);

        let result = (operation.execute)(pc, self, scope);
        if let Err(err) = &result {
            self.trace(true, *pc, op, gas, cost, scope, Some(err));
        }
        result
    }

    /// Validates the stack and pays for `op`, expanding memory when the operation needs
    /// it. Accumulates the charged gas into `cost`.
    fn charge(
        &self,
        op: OpCode,
        scope: &mut ScopeContext<'_>,
        cost: &mut u64,
    ) -> VMResult<Operation> {
        let operation = *self
            .table
            .operation(op)
            .ok_or(VMError::InvalidOpcode(op.0))?;

        let stack_len = scope.stack.len();
        if stack_len < operation.min_stack {
            return Err(VMError::StackUnderflow {
                stack_len,
                required: operation.min_stack,
            });
        }
        if stack_len > operation.max_stack {
            return Err(VMError::StackOverflow {
                stack_len,
                limit: operation.max_stack,
            });
        }

        if !scope.contract.use_gas(operation.constant_gas) {
            return Err(VMError::OutOfGas);
        }
        *cost = operation.constant_gas;

        if let Some(dynamic_gas) = operation.dynamic_gas {
            let mut memory_size = 0;
            if let Some(size_fn) = operation.memory_size {
                let size = size_fn(scope.stack)?;
                memory_size = to_word_size(size)
                    .checked_mul(32)
                    .ok_or(VMError::GasUintOverflow)?;
            }
            let dynamic_cost = dynamic_gas(scope.stack, scope.memory, memory_size)
                .map_err(|_| VMError::OutOfGas)?;
            *cost = cost.saturating_add(dynamic_cost);
            if !scope.contract.use_gas(dynamic_cost) {
                return Err(VMError::OutOfGas);
            }
            if memory_size > 0 {
                scope.memory.resize(memory_size);
            }
        }
        Ok(operation)
    }

    #[allow(clippy::too_many_arguments)]
    fn trace(
        &mut self,
        fault: bool,
        pc: u64,
        op: OpCode,
        gas: u64,
        cost: u64,
        scope: &ScopeContext<'_>,
        error: Option<&VMError>,
    ) {
        let depth = self.call_context.depth;
        if let Some(tracer) = self.tracer.as_deref_mut() {
            let event = StepEvent {
                pc,
                op,
                gas,
                cost,
                depth,
                stack: &*scope.stack,
                memory: &*scope.memory,
                error,
            };
            if fault {
                tracer.capture_fault(&event);
            } else {
                tracer.capture_state(&event);
            }
        }
    }
}
