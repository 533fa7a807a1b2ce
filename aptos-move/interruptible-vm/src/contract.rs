// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::opcodes::OpCode;
use bytes::Bytes;
use primitive_types::U256;

/// Code, input and gas of the invocation being executed.
#[derive(Clone, Debug)]
pub struct Contract {
    code: Bytes,
    pub(crate) input: Bytes,
    gas: u64,
    // Bit i is set iff code[i] is a JUMPDEST that is not part of PUSH data.
    jump_dests: Vec<u64>,
}

impl Contract {
    pub fn new(code: impl Into<Bytes>, gas: u64) -> Self {
        let code = code.into();
        let jump_dests = analyse_jump_dests(&code);
        Self {
            code,
            input: Bytes::new(),
            gas,
            jump_dests,
        }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// Remaining gas.
    pub fn gas(&self) -> u64 {
        self.gas
    }

    /// Returns the instruction at `pc`; reading past the end of the code yields STOP.
    pub fn get_op(&self, pc: u64) -> OpCode {
        usize::try_from(pc)
            .ok()
            .and_then(|pc| self.code.get(pc))
            .map_or(OpCode::STOP, |byte| OpCode(*byte))
    }

    /// Attempts to consume `gas` units. Leaves the counter untouched and returns false
    /// when not enough gas is left.
    pub fn use_gas(&mut self, gas: u64) -> bool {
        if self.gas < gas {
            return false;
        }
        self.gas -= gas;
        true
    }

    pub fn valid_jump_dest(&self, dest: &U256) -> bool {
        if *dest >= U256::from(self.code.len() as u64) {
            return false;
        }
        let dest = dest.low_u64() as usize;
        self.jump_dests[dest / 64] & (1 << (dest % 64)) != 0
    }
}

fn analyse_jump_dests(code: &[u8]) -> Vec<u64> {
    let mut bits = vec![0u64; code.len() / 64 + 1];
    let mut pc = 0;
    while pc < code.len() {
        let op = OpCode(code[pc]);
        if op == OpCode::JUMPDEST {
            bits[pc / 64] |= 1 << (pc % 64);
        }
        pc += 1 + op.immediate_size();
    }
    bits
}
