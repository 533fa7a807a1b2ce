// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Opcode dispatch.
//!
//! Every [`Ruleset`] owns one immutable [`JumpTable`], built on first use and shared by
//! all interpreters through an `Arc`. Optional [`Feature`]s are not applied by copying
//! that table: a [`DispatchTable`] keeps the base table plus a small map of overriding
//! entries, which is consulted first on lookup.

use crate::{
    errors::VMResult,
    gas::{self, *},
    instructions::*,
    interpreter::{Interpreter, ScopeContext, Step},
    memory::Memory,
    opcodes::OpCode,
    stack::{Stack, STACK_LIMIT},
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, error};

/// Effect of an instruction. Receives the program counter, which it may advance past
/// immediate data, the interpreter (host access, call context, nested runs) and the
/// frame of the running invocation.
pub type ExecutionFn = fn(&mut u64, &mut Interpreter<'_>, &mut ScopeContext<'_>) -> VMResult<Step>;
/// Variable part of an instruction's cost, given the stack, the memory and the
/// word-aligned memory size the instruction needs.
pub type DynamicGasFn = fn(&Stack, &mut Memory, u64) -> VMResult<u64>;
/// Memory end offset an instruction is about to touch.
pub type MemorySizeFn = fn(&Stack) -> VMResult<u64>;

#[derive(Clone, Copy)]
pub struct Operation {
    pub execute: ExecutionFn,
    pub constant_gas: u64,
    pub dynamic_gas: Option<DynamicGasFn>,
    pub memory_size: Option<MemorySizeFn>,
    /// Minimum stack depth required to run.
    pub min_stack: usize,
    /// Maximum stack depth allowed before running without overflowing the limit.
    pub max_stack: usize,
}

impl Operation {
    /// Operation with fixed cost that pops `pops` and pushes `pushes` words.
    pub const fn new(execute: ExecutionFn, constant_gas: u64, pops: usize, pushes: usize) -> Self {
        Self {
            execute,
            constant_gas,
            dynamic_gas: None,
            memory_size: None,
            min_stack: pops,
            max_stack: STACK_LIMIT + pops - pushes,
        }
    }

    pub const fn with_memory(self, memory_size: MemorySizeFn, dynamic_gas: DynamicGasFn) -> Self {
        Self {
            dynamic_gas: Some(dynamic_gas),
            memory_size: Some(memory_size),
            ..self
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("constant_gas", &self.constant_gas)
            .field("dynamic_gas", &self.dynamic_gas.is_some())
            .field("memory_size", &self.memory_size.is_some())
            .field("min_stack", &self.min_stack)
            .field("max_stack", &self.max_stack)
            .finish()
    }
}

/// Full 256-entry opcode table; unassigned bytes have no operation.
pub struct JumpTable([Option<Operation>; 256]);

impl JumpTable {
    fn empty() -> Self {
        Self([None; 256])
    }

    fn set(&mut self, op: OpCode, operation: Operation) {
        self.0[op.0 as usize] = Some(operation);
    }

    pub fn get(&self, op: OpCode) -> Option<&Operation> {
        self.0[op.0 as usize].as_ref()
    }
}

/// Instruction set generation a dispatch table is built for.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ruleset {
    Frontier,
    /// Adds REVERT and the bitwise shifts.
    Constantinople,
    /// Adds PUSH0.
    Shanghai,
    /// Adds MCOPY.
    #[default]
    Cancun,
}

static FRONTIER_TABLE: Lazy<Arc<JumpTable>> = Lazy::new(|| Arc::new(frontier_table()));
static CONSTANTINOPLE_TABLE: Lazy<Arc<JumpTable>> =
    Lazy::new(|| Arc::new(constantinople_table()));
static SHANGHAI_TABLE: Lazy<Arc<JumpTable>> = Lazy::new(|| Arc::new(shanghai_table()));
static CANCUN_TABLE: Lazy<Arc<JumpTable>> = Lazy::new(|| Arc::new(cancun_table()));

impl Ruleset {
    pub fn base_table(self) -> Arc<JumpTable> {
        match self {
            Ruleset::Frontier => FRONTIER_TABLE.clone(),
            Ruleset::Constantinople => CONSTANTINOPLE_TABLE.clone(),
            Ruleset::Shanghai => SHANGHAI_TABLE.clone(),
            Ruleset::Cancun => CANCUN_TABLE.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("undefined feature {0}")]
pub struct UnknownFeature(pub u32);

/// Optional instruction set extensions, identified by their improvement proposal
/// number.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Feature {
    BitwiseShifting,
    Push0,
    Mcopy,
}

impl Feature {
    pub fn id(self) -> u32 {
        match self {
            Feature::BitwiseShifting => 145,
            Feature::Push0 => 3855,
            Feature::Mcopy => 5656,
        }
    }

    fn operations(self) -> Vec<(OpCode, Operation)> {
        match self {
            Feature::BitwiseShifting => vec![
                (OpCode::SHL, Operation::new(op_shl, GAS_FASTEST_STEP, 2, 1)),
                (OpCode::SHR, Operation::new(op_shr, GAS_FASTEST_STEP, 2, 1)),
            ],
            Feature::Push0 => vec![(
                OpCode::PUSH0,
                Operation::new(op_push0, GAS_QUICK_STEP, 0, 1),
            )],
            Feature::Mcopy => vec![(
                OpCode::MCOPY,
                Operation::new(op_mcopy, GAS_FASTEST_STEP, 3, 0)
                    .with_memory(gas::memory_mcopy, gas::gas_mcopy),
            )],
        }
    }
}

impl TryFrom<u32> for Feature {
    type Error = UnknownFeature;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        match id {
            145 => Ok(Feature::BitwiseShifting),
            3855 => Ok(Feature::Push0),
            5656 => Ok(Feature::Mcopy),
            _ => Err(UnknownFeature(id)),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EIP-{}", self.id())
    }
}

/// Opcode lookup used by an interpreter: a shared ruleset table plus sparse overrides.
#[derive(Clone)]
pub struct DispatchTable {
    ruleset: Ruleset,
    base: Arc<JumpTable>,
    overrides: BTreeMap<u8, Operation>,
    active_features: Vec<Feature>,
}

impl DispatchTable {
    /// Builds the table for `ruleset` and activates `extra_features` on top of it.
    /// Unknown feature ids are logged and skipped; they do not appear in
    /// [`DispatchTable::active_features`].
    pub fn new(ruleset: Ruleset, extra_features: &[u32]) -> Self {
        let mut table = Self {
            ruleset,
            base: ruleset.base_table(),
            overrides: BTreeMap::new(),
            active_features: Vec::with_capacity(extra_features.len()),
        };
        for id in extra_features {
            match Feature::try_from(*id) {
                Ok(feature) => table.activate(feature),
                Err(err) => error!(
                    ruleset = ?ruleset,
                    error = %err,
                    "Failed to activate feature, dropping it"
                ),
            }
        }
        table
    }

    fn activate(&mut self, feature: Feature) {
        if self.active_features.contains(&feature) {
            return;
        }
        for (op, operation) in feature.operations() {
            self.overrides.insert(op.0, operation);
        }
        debug!(feature = %feature, ruleset = ?self.ruleset, "Activated feature");
        self.active_features.push(feature);
    }

    /// Installs `operation` for `op`, shadowing the ruleset's entry. Lets embedders plug
    /// instructions the reference set does not define.
    pub fn with_operation(mut self, op: OpCode, operation: Operation) -> Self {
        self.overrides.insert(op.0, operation);
        self
    }

    /// Operation bound to `op`, `None` if the opcode is undefined under this table.
    pub fn operation(&self, op: OpCode) -> Option<&Operation> {
        self.overrides.get(&op.0).or_else(|| self.base.get(op))
    }

    pub fn is_defined(&self, op: OpCode) -> bool {
        self.operation(op).is_some()
    }

    pub fn ruleset(&self) -> Ruleset {
        self.ruleset
    }

    pub fn active_features(&self) -> &[Feature] {
        &self.active_features
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new(Ruleset::default(), &[])
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("ruleset", &self.ruleset)
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .field("active_features", &self.active_features)
            .finish()
    }
}

fn frontier_table() -> JumpTable {
    let mut table = JumpTable::empty();

    table.set(OpCode::STOP, Operation::new(op_stop, GAS_ZERO_STEP, 0, 0));
    table.set(OpCode::ADD, Operation::new(op_add, GAS_FASTEST_STEP, 2, 1));
    table.set(OpCode::MUL, Operation::new(op_mul, GAS_FAST_STEP, 2, 1));
    table.set(OpCode::SUB, Operation::new(op_sub, GAS_FASTEST_STEP, 2, 1));
    table.set(OpCode::DIV, Operation::new(op_div, GAS_FAST_STEP, 2, 1));
    table.set(OpCode::MOD, Operation::new(op_mod, GAS_FAST_STEP, 2, 1));
    table.set(OpCode::LT, Operation::new(op_lt, GAS_FASTEST_STEP, 2, 1));
    table.set(OpCode::GT, Operation::new(op_gt, GAS_FASTEST_STEP, 2, 1));
    table.set(OpCode::EQ, Operation::new(op_eq, GAS_FASTEST_STEP, 2, 1));
    table.set(OpCode::ISZERO, Operation::new(op_iszero, GAS_FASTEST_STEP, 1, 1));
    table.set(OpCode::AND, Operation::new(op_and, GAS_FASTEST_STEP, 2, 1));
    table.set(OpCode::OR, Operation::new(op_or, GAS_FASTEST_STEP, 2, 1));
    table.set(OpCode::XOR, Operation::new(op_xor, GAS_FASTEST_STEP, 2, 1));
    table.set(OpCode::NOT, Operation::new(op_not, GAS_FASTEST_STEP, 1, 1));
    table.set(
        OpCode::CALLDATALOAD,
        Operation::new(op_calldataload, GAS_FASTEST_STEP, 1, 1),
    );
    table.set(
        OpCode::CALLDATASIZE,
        Operation::new(op_calldatasize, GAS_QUICK_STEP, 0, 1),
    );
    table.set(OpCode::POP, Operation::new(op_pop, GAS_QUICK_STEP, 1, 0));
    table.set(
        OpCode::MLOAD,
        Operation::new(op_mload, GAS_FASTEST_STEP, 1, 1)
            .with_memory(gas::memory_mload, gas::pure_memory_gas),
    );
    table.set(
        OpCode::MSTORE,
        Operation::new(op_mstore, GAS_FASTEST_STEP, 2, 0)
            .with_memory(gas::memory_mstore, gas::pure_memory_gas),
    );
    table.set(
        OpCode::MSTORE8,
        Operation::new(op_mstore8, GAS_FASTEST_STEP, 2, 0)
            .with_memory(gas::memory_mstore8, gas::pure_memory_gas),
    );
    table.set(OpCode::SLOAD, Operation::new(op_sload, GAS_SLOAD, 1, 1));
    table.set(OpCode::SSTORE, Operation::new(op_sstore, GAS_SSTORE, 2, 0));
    table.set(OpCode::JUMP, Operation::new(op_jump, GAS_MID_STEP, 1, 0));
    table.set(OpCode::JUMPI, Operation::new(op_jumpi, GAS_SLOW_STEP, 2, 0));
    table.set(OpCode::PC, Operation::new(op_pc, GAS_QUICK_STEP, 0, 1));
    table.set(OpCode::MSIZE, Operation::new(op_msize, GAS_QUICK_STEP, 0, 1));
    table.set(OpCode::GAS, Operation::new(op_gas, GAS_QUICK_STEP, 0, 1));
    table.set(OpCode::JUMPDEST, Operation::new(op_jumpdest, GAS_JUMPDEST, 0, 0));
    table.set(
        OpCode::RETURN,
        Operation::new(op_return, GAS_ZERO_STEP, 2, 0)
            .with_memory(gas::memory_return, gas::pure_memory_gas),
    );
    table.set(OpCode::INVALID, Operation::new(op_invalid, GAS_ZERO_STEP, 0, 0));

    set_push_dup_swap(&mut table);
    table
}

macro_rules! set_sized {
    ($table:ident, $base:expr, $make:ident, [$($n:literal),*]) => {
        $( $table.set(OpCode($base + $n - 1), $make::<$n>()); )*
    };
}

fn push_operation<const N: usize>() -> Operation {
    Operation::new(op_push::<N>, GAS_FASTEST_STEP, 0, 1)
}

fn dup_operation<const N: usize>() -> Operation {
    Operation::new(op_dup::<N>, GAS_FASTEST_STEP, N, N + 1)
}

fn swap_operation<const N: usize>() -> Operation {
    Operation::new(op_swap::<N>, GAS_FASTEST_STEP, N + 1, N + 1)
}

fn set_push_dup_swap(table: &mut JumpTable) {
    set_sized!(table, OpCode::PUSH1.0, push_operation, [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32
    ]);
    set_sized!(table, OpCode::DUP1.0, dup_operation, [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16
    ]);
    set_sized!(table, OpCode::SWAP1.0, swap_operation, [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16
    ]);
}

fn constantinople_table() -> JumpTable {
    let mut table = frontier_table();
    table.set(
        OpCode::REVERT,
        Operation::new(op_revert, GAS_ZERO_STEP, 2, 0)
            .with_memory(gas::memory_return, gas::pure_memory_gas),
    );
    apply(&mut table, Feature::BitwiseShifting);
    table
}

fn shanghai_table() -> JumpTable {
    let mut table = constantinople_table();
    apply(&mut table, Feature::Push0);
    table
}

fn cancun_table() -> JumpTable {
    let mut table = shanghai_table();
    apply(&mut table, Feature::Mcopy);
    table
}

fn apply(table: &mut JumpTable, feature: Feature) {
    for (op, operation) in feature.operations() {
        table.set(op, operation);
    }
}
