// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    dispatch_table::{DispatchTable, Feature, Ruleset},
    interruption::{InterruptionLedger, INTERRUPTED_TXN_CACHE_SIZE},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to sanitize the config! Sanitizer: {0}, Error: {1}")]
    ConfigSanitizerFailed(String, String),
    #[error("Error accessing {0}: {1}")]
    IO(String, #[source] std::io::Error),
    #[error("Error (de)serializing {0}: {1}")]
    Yaml(String, #[source] serde_yaml::Error),
}

/// Configs that can be read from YAML, from a string or from disk.
pub trait LoadableConfig: DeserializeOwned + Sized {
    fn parse_serialized_config(serialized_config: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(serialized_config)
            .map_err(|e| ConfigError::Yaml("config".to_string(), e))
    }

    fn load_config<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_string = path.as_ref().display().to_string();
        let contents =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::IO(path_string, e))?;
        Self::parse_serialized_config(&contents)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VMConfig {
    /// Instruction set generation.
    pub ruleset: Ruleset,
    /// Feature ids activated on top of the ruleset. Unknown ids are skipped.
    pub extra_features: Vec<u32>,
    /// Number of task identities the interruption ledger remembers.
    pub interrupted_txn_cache_size: usize,
}

impl Default for VMConfig {
    fn default() -> VMConfig {
        VMConfig {
            ruleset: Ruleset::default(),
            extra_features: vec![],
            interrupted_txn_cache_size: INTERRUPTED_TXN_CACHE_SIZE,
        }
    }
}

impl LoadableConfig for VMConfig {}

impl VMConfig {
    pub fn sanitize(&self) -> Result<(), ConfigError> {
        let sanitizer_name = "VMConfig".to_string();

        if self.interrupted_txn_cache_size == 0 {
            return Err(ConfigError::ConfigSanitizerFailed(
                sanitizer_name,
                "interrupted_txn_cache_size must be greater than 0".to_string(),
            ));
        }
        for id in &self.extra_features {
            if Feature::try_from(*id).is_err() {
                warn!(feature = id, "Unknown feature in config, it will not be activated");
            }
        }
        Ok(())
    }

    pub fn dispatch_table(&self) -> DispatchTable {
        DispatchTable::new(self.ruleset, &self.extra_features)
    }

    pub fn interruption_ledger(&self) -> InterruptionLedger {
        InterruptionLedger::new(self.interrupted_txn_cache_size)
    }
}
