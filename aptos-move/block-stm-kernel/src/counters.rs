// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_histogram, register_int_counter, Histogram, IntCounter,
};

/// Count of times the speculative execution of a transaction was invalidated
pub static SPECULATIVE_ABORT_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "aptos_block_stm_speculative_abort_count",
        "Number of speculative aborts in parallel execution (leading to re-execution)"
    )
    .unwrap()
});

/// Count of dependency edges recorded between transactions
pub static DEPENDENCY_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "aptos_block_stm_dependency_count",
        "Number of times a transaction waited on an unfinished earlier transaction"
    )
    .unwrap()
});

/// Count of execution attempts stopped by a cancellation request
pub static INTERRUPTED_EXECUTION_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "aptos_block_stm_interrupted_execution_count",
        "Number of execution attempts interrupted and re-queued"
    )
    .unwrap()
});

pub static CODE_INVARIANT_ERROR_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "aptos_block_stm_code_invariant_error_count",
        "Number of scheduler code invariant violations"
    )
    .unwrap()
});

pub static PARALLEL_EXECUTION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "aptos_block_stm_parallel_execution_seconds",
        "Time spent in parallel block execution",
        exponential_buckets(/*start=*/ 1e-6, /*factor=*/ 2.0, /*count=*/ 30).unwrap(),
    )
    .unwrap()
});

pub static TASK_EXECUTE_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "aptos_block_stm_task_execute_seconds",
        "Time spent in a single speculative execution attempt",
        exponential_buckets(/*start=*/ 1e-6, /*factor=*/ 2.0, /*count=*/ 30).unwrap(),
    )
    .unwrap()
});

pub static TASK_VALIDATE_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "aptos_block_stm_task_validate_seconds",
        "Time spent validating the reads of a transaction",
        exponential_buckets(/*start=*/ 1e-6, /*factor=*/ 2.0, /*count=*/ 30).unwrap(),
    )
    .unwrap()
});
