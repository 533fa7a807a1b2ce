// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{errors::VMError, memory::Memory, opcodes::OpCode, stack::Stack};
use tracing::debug;

/// Snapshot of the interpreter at one instruction.
#[derive(Debug)]
pub struct StepEvent<'s> {
    pub pc: u64,
    pub op: OpCode,
    /// Gas left before the instruction was charged.
    pub gas: u64,
    /// Gas charged for the instruction so far.
    pub cost: u64,
    pub depth: usize,
    pub stack: &'s Stack,
    pub memory: &'s Memory,
    pub error: Option<&'s VMError>,
}

/// Observer of interpreter steps.
///
/// `capture_state` fires once per instruction after its gas was paid and before its
/// effect runs. If the instruction fails before that point, `capture_state` fires
/// instead with `error` set. A failure of the effect itself is reported through
/// `capture_fault`.
pub trait Tracer {
    fn capture_state(&mut self, event: &StepEvent<'_>);

    fn capture_fault(&mut self, event: &StepEvent<'_>);
}

/// Tracer that emits every step as a debug log line.
#[derive(Debug, Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn capture_state(&mut self, event: &StepEvent<'_>) {
        debug!(
            pc = event.pc,
            op = %event.op,
            gas = event.gas,
            cost = event.cost,
            depth = event.depth,
            stack_len = event.stack.len(),
            memory_len = event.memory.len(),
            error = ?event.error,
            "step"
        );
    }

    fn capture_fault(&mut self, event: &StepEvent<'_>) {
        debug!(
            pc = event.pc,
            op = %event.op,
            depth = event.depth,
            error = ?event.error,
            "fault"
        );
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepRecord {
    pub pc: u64,
    pub op: OpCode,
    pub gas: u64,
    pub cost: u64,
    pub depth: usize,
    pub stack_len: usize,
    pub error: Option<VMError>,
}

impl From<&StepEvent<'_>> for StepRecord {
    fn from(event: &StepEvent<'_>) -> Self {
        Self {
            pc: event.pc,
            op: event.op,
            gas: event.gas,
            cost: event.cost,
            depth: event.depth,
            stack_len: event.stack.len(),
            error: event.error.cloned(),
        }
    }
}

/// Tracer that keeps every step in memory.
#[derive(Clone, Debug, Default)]
pub struct StepRecorder {
    pub steps: Vec<StepRecord>,
    pub faults: Vec<StepRecord>,
}

impl Tracer for StepRecorder {
    fn capture_state(&mut self, event: &StepEvent<'_>) {
        self.steps.push(event.into());
    }

    fn capture_fault(&mut self, event: &StepEvent<'_>) {
        self.faults.push(event.into());
    }
}
