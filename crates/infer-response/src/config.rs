// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Response transport configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! arena_path = "/dev/shm/pbresp.arena"
//! arena_budget = "64M"
//! copy_device_data = false
//! open_device_handle = true
//! log_metrics = true
//! ```

use crate::ResponseError;
use shm_arena::{MemoryBudget, ShmArena};
use std::path::{Path, PathBuf};

/// Configuration for encoding, decoding and delivering responses.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponseConfig {
    /// Backing file for the arena. An anonymous mapping is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arena_path: Option<PathBuf>,
    /// Arena capacity (human-readable, e.g., `"64M"`).
    pub arena_budget: String,
    /// Stage device tensor data into the arena instead of passing IPC handles.
    pub copy_device_data: bool,
    /// Map peer device allocations eagerly when decoding.
    pub open_device_handle: bool,
    /// Log delivery metrics at `info` after each send.
    pub log_metrics: bool,
}

impl ResponseConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ResponseError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResponseError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ResponseError> {
        toml::from_str(toml_str).map_err(|e| ResponseError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ResponseError> {
        toml::to_string_pretty(self)
            .map_err(|e| ResponseError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Parses the arena budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, ResponseError> {
        MemoryBudget::parse(&self.arena_budget)
            .map_err(|e| ResponseError::ConfigError(format!("invalid budget: {e}")))
    }

    /// Creates the arena this config describes, replacing any existing
    /// backing file.
    pub fn create_arena(&self) -> Result<ShmArena, ResponseError> {
        let budget = self.parse_budget()?;
        let arena = match &self.arena_path {
            Some(path) => ShmArena::create(path, budget)?,
            None => ShmArena::anonymous(budget)?,
        };
        Ok(arena)
    }

    /// Opens the existing file-backed arena this config names.
    pub fn open_arena(&self) -> Result<ShmArena, ResponseError> {
        let path = self
            .arena_path
            .as_deref()
            .ok_or_else(|| ResponseError::ConfigError("no arena_path configured".into()))?;
        Ok(ShmArena::open(path)?)
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            arena_path: None,
            arena_budget: "64M".to_string(),
            copy_device_data: false,
            open_device_handle: true,
            log_metrics: false,
        }
    }
}
