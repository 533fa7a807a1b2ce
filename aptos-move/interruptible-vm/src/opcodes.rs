// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// A single byte of bytecode interpreted as an instruction.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OpCode(pub u8);

impl OpCode {
    pub const ADD: OpCode = OpCode(0x01);
    pub const AND: OpCode = OpCode(0x16);
    pub const CALLDATALOAD: OpCode = OpCode(0x35);
    pub const CALLDATASIZE: OpCode = OpCode(0x36);
    pub const DIV: OpCode = OpCode(0x04);
    pub const DUP1: OpCode = OpCode(0x80);
    pub const DUP16: OpCode = OpCode(0x8f);
    pub const EQ: OpCode = OpCode(0x14);
    pub const GAS: OpCode = OpCode(0x5a);
    pub const GT: OpCode = OpCode(0x11);
    pub const INVALID: OpCode = OpCode(0xfe);
    pub const ISZERO: OpCode = OpCode(0x15);
    pub const JUMP: OpCode = OpCode(0x56);
    pub const JUMPDEST: OpCode = OpCode(0x5b);
    pub const JUMPI: OpCode = OpCode(0x57);
    pub const LT: OpCode = OpCode(0x10);
    pub const MCOPY: OpCode = OpCode(0x5e);
    pub const MLOAD: OpCode = OpCode(0x51);
    pub const MOD: OpCode = OpCode(0x06);
    pub const MSIZE: OpCode = OpCode(0x59);
    pub const MSTORE: OpCode = OpCode(0x52);
    pub const MSTORE8: OpCode = OpCode(0x53);
    pub const MUL: OpCode = OpCode(0x02);
    pub const NOT: OpCode = OpCode(0x19);
    pub const OR: OpCode = OpCode(0x17);
    pub const PC: OpCode = OpCode(0x58);
    pub const POP: OpCode = OpCode(0x50);
    pub const PUSH0: OpCode = OpCode(0x5f);
    pub const PUSH1: OpCode = OpCode(0x60);
    pub const PUSH32: OpCode = OpCode(0x7f);
    pub const RETURN: OpCode = OpCode(0xf3);
    pub const REVERT: OpCode = OpCode(0xfd);
    pub const SHL: OpCode = OpCode(0x1b);
    pub const SHR: OpCode = OpCode(0x1c);
    pub const SLOAD: OpCode = OpCode(0x54);
    pub const SSTORE: OpCode = OpCode(0x55);
    pub const STOP: OpCode = OpCode(0x00);
    pub const SUB: OpCode = OpCode(0x03);
    pub const SWAP1: OpCode = OpCode(0x90);
    pub const SWAP16: OpCode = OpCode(0x9f);
    pub const XOR: OpCode = OpCode(0x18);

    pub fn is_push(self) -> bool {
        self >= Self::PUSH1 && self <= Self::PUSH32
    }

    /// Number of immediate bytes following a PUSH instruction, zero otherwise.
    pub fn immediate_size(self) -> usize {
        if self.is_push() {
            (self.0 - Self::PUSH1.0 + 1) as usize
        } else {
            0
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::STOP => "STOP",
            Self::ADD => "ADD",
            Self::MUL => "MUL",
            Self::SUB => "SUB",
            Self::DIV => "DIV",
            Self::MOD => "MOD",
            Self::LT => "LT",
            Self::GT => "GT",
            Self::EQ => "EQ",
            Self::ISZERO => "ISZERO",
            Self::AND => "AND",
            Self::OR => "OR",
            Self::XOR => "XOR",
            Self::NOT => "NOT",
            Self::SHL => "SHL",
            Self::SHR => "SHR",
            Self::CALLDATALOAD => "CALLDATALOAD",
            Self::CALLDATASIZE => "CALLDATASIZE",
            Self::POP => "POP",
            Self::MLOAD => "MLOAD",
            Self::MSTORE => "MSTORE",
            Self::MSTORE8 => "MSTORE8",
            Self::SLOAD => "SLOAD",
            Self::SSTORE => "SSTORE",
            Self::JUMP => "JUMP",
            Self::JUMPI => "JUMPI",
            Self::PC => "PC",
            Self::MSIZE => "MSIZE",
            Self::GAS => "GAS",
            Self::JUMPDEST => "JUMPDEST",
            Self::MCOPY => "MCOPY",
            Self::PUSH0 => "PUSH0",
            Self::RETURN => "RETURN",
            Self::REVERT => "REVERT",
            Self::INVALID => "INVALID",
            op if op.is_push() => "PUSH",
            op if op >= Self::DUP1 && op <= Self::DUP16 => "DUP",
            op if op >= Self::SWAP1 && op <= Self::SWAP16 => "SWAP",
            _ => "UNDEFINED",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match name {
            "PUSH" => write!(f, "PUSH{}", self.immediate_size()),
            "DUP" => write!(f, "DUP{}", self.0 - Self::DUP1.0 + 1),
            "SWAP" => write!(f, "SWAP{}", self.0 - Self::SWAP1.0 + 1),
            "UNDEFINED" => write!(f, "opcode {:#04x} not defined", self.0),
            _ => f.write_str(name),
        }
    }
}

impl From<u8> for OpCode {
    fn from(byte: u8) -> Self {
        OpCode(byte)
    }
}
