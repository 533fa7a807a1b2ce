// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! A gas-metered stack VM whose interpreter loop can be stopped cooperatively at any
//! instruction boundary. Built for speculative execution: a scheduler hands every
//! attempt a [`CancellationHandle`] and raises it when the attempt's result is known to
//! be stale.

pub mod config;
pub mod contract;
pub mod counters;
pub mod dispatch_table;
pub mod errors;
pub mod gas;
pub mod host;
mod instructions;
pub mod interpreter;
pub mod interruption;
pub mod memory;
pub mod opcodes;
pub mod stack;
pub mod tracer;

#[cfg(test)]
mod unit_tests;

pub use crate::{
    config::{ConfigError, LoadableConfig, VMConfig},
    contract::Contract,
    dispatch_table::{DispatchTable, Feature, Operation, Ruleset},
    errors::{VMError, VMResult},
    host::{Host, InMemoryHost},
    interpreter::{CallContext, Halt, Interpreter, InterpreterResult, ScopeContext, Step},
    interruption::{CancellationHandle, Canceller, InterruptDecision, InterruptionLedger, TaskId},
    opcodes::OpCode,
    tracer::{LogTracer, StepEvent, StepRecorder, Tracer},
};
pub use primitive_types::U256;
