// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

/// Count of attempts stopped at an instruction boundary because of a cancellation request
pub static OPCODE_INTERRUPT_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "aptos_vm_opcode_interrupt_count",
        "Count of interpreter runs interrupted at an instruction boundary"
    )
    .unwrap()
});

/// Count of interpreter runs ended by a fault, by kind
pub static INTERPRETER_FAULT_COUNT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "aptos_vm_interpreter_fault_count",
        "Count of interpreter runs ended by a fault",
        &["kind"]
    )
    .unwrap()
});
