// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Effects of the reference instruction set. Stack depth, gas and memory expansion are
//! all handled by the interpreter before an effect runs.

use crate::{
    errors::{VMError, VMResult},
    interpreter::{Halt, Interpreter, ScopeContext, Step},
};
use primitive_types::U256;

type Effect = VMResult<Step>;

fn bool_word(value: bool) -> U256 {
    if value {
        U256::one()
    } else {
        U256::zero()
    }
}

// The interpreter has already expanded memory to cover any offset popped here, so
// those offsets fit in a u64.
fn offset(value: &U256) -> u64 {
    value.low_u64()
}

fn binary(scope: &mut ScopeContext<'_>, f: impl FnOnce(U256, U256) -> U256) -> Effect {
    let a = scope.stack.pop()?;
    let b = scope.stack.pop()?;
    scope.stack.push(f(a, b));
    Ok(Step::Continue)
}

fn unary(scope: &mut ScopeContext<'_>, f: impl FnOnce(U256) -> U256) -> Effect {
    let a = scope.stack.pop()?;
    scope.stack.push(f(a));
    Ok(Step::Continue)
}

pub(crate) fn op_stop(_: &mut u64, _: &mut Interpreter<'_>, _: &mut ScopeContext<'_>) -> Effect {
    Ok(Step::Halt(Halt::Stop))
}

pub(crate) fn op_add(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| a.overflowing_add(b).0)
}

pub(crate) fn op_mul(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| a.overflowing_mul(b).0)
}

pub(crate) fn op_sub(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| a.overflowing_sub(b).0)
}

pub(crate) fn op_div(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| if b.is_zero() { U256::zero() } else { a / b })
}

pub(crate) fn op_mod(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| if b.is_zero() { U256::zero() } else { a % b })
}

pub(crate) fn op_lt(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| bool_word(a < b))
}

pub(crate) fn op_gt(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| bool_word(a > b))
}

pub(crate) fn op_eq(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| bool_word(a == b))
}

pub(crate) fn op_iszero(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    unary(scope, |a| bool_word(a.is_zero()))
}

pub(crate) fn op_and(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| a & b)
}

pub(crate) fn op_or(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| a | b)
}

pub(crate) fn op_xor(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |a, b| a ^ b)
}

pub(crate) fn op_not(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    unary(scope, |a| !a)
}

/// `SHL shift value`: shifts of 256 bits or more yield zero.
pub(crate) fn op_shl(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |shift, value| {
        if shift >= U256::from(256) {
            U256::zero()
        } else {
            value << shift
        }
    })
}

pub(crate) fn op_shr(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    binary(scope, |shift, value| {
        if shift >= U256::from(256) {
            U256::zero()
        } else {
            value >> shift
        }
    })
}

/// Loads 32 bytes of input at the popped offset, zero-padded past the end.
pub(crate) fn op_calldataload(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let start = scope.stack.pop()?;
    let input = scope.contract.input();
    let mut word = [0u8; 32];
    if start < U256::from(input.len() as u64) {
        let start = start.low_u64() as usize;
        let end = input.len().min(start + 32);
        word[..end - start].copy_from_slice(&input[start..end]);
    }
    scope.stack.push(U256::from_big_endian(&word));
    Ok(Step::Continue)
}

pub(crate) fn op_calldatasize(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let size = scope.contract.input().len() as u64;
    scope.stack.push(U256::from(size));
    Ok(Step::Continue)
}

pub(crate) fn op_pop(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    scope.stack.pop()?;
    Ok(Step::Continue)
}

pub(crate) fn op_mload(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let at = scope.stack.pop()?;
    let word = scope.memory.get_word(offset(&at));
    scope.stack.push(word);
    Ok(Step::Continue)
}

pub(crate) fn op_mstore(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let at = scope.stack.pop()?;
    let value = scope.stack.pop()?;
    scope.memory.set32(offset(&at), value);
    Ok(Step::Continue)
}

pub(crate) fn op_mstore8(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let at = scope.stack.pop()?;
    let value = scope.stack.pop()?;
    scope.memory.set(offset(&at), &[value.byte(0)]);
    Ok(Step::Continue)
}

pub(crate) fn op_sload(
    _: &mut u64,
    interpreter: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let key = scope.stack.pop()?;
    let value = interpreter.host_mut().sload(&key)?;
    scope.stack.push(value);
    Ok(Step::Continue)
}

pub(crate) fn op_sstore(
    _: &mut u64,
    interpreter: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    if interpreter.call_context().read_only() {
        return Err(VMError::WriteProtection);
    }
    let key = scope.stack.pop()?;
    let value = scope.stack.pop()?;
    interpreter.host_mut().sstore(key, value)?;
    Ok(Step::Continue)
}

fn jump_to(scope: &ScopeContext<'_>, dest: U256) -> Effect {
    if !scope.contract.valid_jump_dest(&dest) {
        return Err(VMError::InvalidJump(dest));
    }
    Ok(Step::Jump(dest.low_u64()))
}

pub(crate) fn op_jump(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let dest = scope.stack.pop()?;
    jump_to(scope, dest)
}

pub(crate) fn op_jumpi(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let dest = scope.stack.pop()?;
    let cond = scope.stack.pop()?;
    if cond.is_zero() {
        return Ok(Step::Continue);
    }
    jump_to(scope, dest)
}

pub(crate) fn op_jumpdest(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    _: &mut ScopeContext<'_>,
) -> Effect {
    Ok(Step::Continue)
}

pub(crate) fn op_pc(pc: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    scope.stack.push(U256::from(*pc));
    Ok(Step::Continue)
}

pub(crate) fn op_msize(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let size = scope.memory.len() as u64;
    scope.stack.push(U256::from(size));
    Ok(Step::Continue)
}

/// Pushes the gas left after paying for this instruction.
pub(crate) fn op_gas(_: &mut u64, _: &mut Interpreter<'_>, scope: &mut ScopeContext<'_>) -> Effect {
    let gas = scope.contract.gas();
    scope.stack.push(U256::from(gas));
    Ok(Step::Continue)
}

pub(crate) fn op_mcopy(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let dst = scope.stack.pop()?;
    let src = scope.stack.pop()?;
    let len = scope.stack.pop()?;
    scope
        .memory
        .copy(offset(&dst), offset(&src), offset(&len));
    Ok(Step::Continue)
}

pub(crate) fn op_push0(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    scope.stack.push(U256::zero());
    Ok(Step::Continue)
}

/// Pushes the `N` immediate bytes following the instruction and moves the program
/// counter onto the last of them. Immediates cut off by the end of the code are
/// right-padded with zeros.
pub(crate) fn op_push<const N: usize>(
    pc: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    let code = scope.contract.code();
    let start = (*pc as usize).saturating_add(1).min(code.len());
    let end = start.saturating_add(N).min(code.len());
    let mut word = [0u8; 32];
    word[32 - N..32 - N + (end - start)].copy_from_slice(&code[start..end]);
    scope.stack.push(U256::from_big_endian(&word));
    *pc += N as u64;
    Ok(Step::Continue)
}

pub(crate) fn op_dup<const N: usize>(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    scope.stack.dup(N)?;
    Ok(Step::Continue)
}

pub(crate) fn op_swap<const N: usize>(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    scope.stack.swap(N)?;
    Ok(Step::Continue)
}

fn halt_output(scope: &mut ScopeContext<'_>) -> VMResult<Vec<u8>> {
    let at = scope.stack.pop()?;
    let size = scope.stack.pop()?;
    Ok(scope.memory.get_copy(offset(&at), offset(&size)))
}

pub(crate) fn op_return(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    Ok(Step::Halt(Halt::Return(halt_output(scope)?)))
}

pub(crate) fn op_revert(
    _: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    Ok(Step::Halt(Halt::Revert(halt_output(scope)?)))
}

/// The designated invalid instruction.
pub(crate) fn op_invalid(
    pc: &mut u64,
    _: &mut Interpreter<'_>,
    scope: &mut ScopeContext<'_>,
) -> Effect {
    Err(VMError::InvalidOpcode(scope.contract.get_op(*pc).0))
}
