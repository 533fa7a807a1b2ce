// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use aptos_interruptible_vm::{ConfigError, LoadableConfig, VMConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlockExecutorConfig {
    /// Maximum number of execution attempts in flight. 1 selects sequential execution.
    pub concurrency_level: usize,
    pub vm: VMConfig,
}

impl Default for BlockExecutorConfig {
    fn default() -> BlockExecutorConfig {
        BlockExecutorConfig {
            concurrency_level: num_cpus::get(),
            vm: VMConfig::default(),
        }
    }
}

impl LoadableConfig for BlockExecutorConfig {}

impl BlockExecutorConfig {
    pub fn sanitize(&self) -> Result<(), ConfigError> {
        if self.concurrency_level == 0 {
            return Err(ConfigError::ConfigSanitizerFailed(
                "BlockExecutorConfig".to_string(),
                "concurrency_level must be greater than 0".to_string(),
            ));
        }
        self.vm.sanitize()
    }
}
