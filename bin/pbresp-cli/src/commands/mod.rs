// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the helpers they share.

pub mod decode;
pub mod deliver;
pub mod encode;
pub mod host;
pub mod status;

pub use host::Placement;

use infer_response::ResponseConfig;
use shm_arena::ShmHandle;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tensor_core::{DType, Shape};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` overrides the verbosity flag.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the config file (or defaults) and applies command-line overrides.
pub fn load_config(
    path: Option<&Path>,
    arena: Option<PathBuf>,
    budget: Option<String>,
) -> anyhow::Result<ResponseConfig> {
    let mut config = match path {
        Some(path) => ResponseConfig::from_file(path)?,
        None => ResponseConfig::default(),
    };
    if let Some(arena) = arena {
        config.arena_path = Some(arena);
    }
    if let Some(budget) = budget {
        config.arena_budget = budget;
    }
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

/// Parses a handle printed as `0x…` hex, or as plain decimal.
pub fn parse_handle(s: &str) -> Result<ShmHandle, String> {
    let s = s.trim();
    let raw = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
    .map_err(|e| format!("invalid handle '{s}': {e}"))?;
    if raw == 0 {
        return Err("the null handle names no record".to_string());
    }
    Ok(ShmHandle::from_raw(raw))
}

/// An output tensor described as `name:dtype:dims`, with dims joined by `x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
}

impl FromStr for OutputSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(name), Some(dtype), Some(dims)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("expected name:dtype:dims, got '{s}'"));
        };
        if name.is_empty() {
            return Err("output name is empty".to_string());
        }
        let dtype = DType::parse(dtype).ok_or_else(|| format!("unknown dtype '{dtype}'"))?;
        let dims = if dims.is_empty() {
            Vec::new()
        } else {
            dims.split('x')
                .map(|d| d.parse::<usize>().map_err(|e| format!("invalid dimension '{d}': {e}")))
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self {
            name: name.to_string(),
            dtype,
            shape: Shape::new(dims),
        })
    }
}

/// Shortens `s` to `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handle() {
        assert_eq!(parse_handle("0x50").unwrap().as_raw(), 0x50);
        assert_eq!(parse_handle("80").unwrap().as_raw(), 80);
        assert!(parse_handle("0").is_err());
        assert!(parse_handle("0xzz").is_err());
    }

    #[test]
    fn test_parse_output_arg() {
        let output: OutputSpec = "logits:f32:1x1000".parse().unwrap();
        assert_eq!(output.name, "logits");
        assert_eq!(output.dtype, DType::F32);
        assert_eq!(output.shape, Shape::matrix(1, 1000));

        let scalar: OutputSpec = "loss:f32:".parse().unwrap();
        assert_eq!(scalar.shape, Shape::scalar());
    }

    #[test]
    fn test_reject_bad_output_arg() {
        assert!("logits".parse::<OutputSpec>().is_err());
        assert!("logits:complex:4".parse::<OutputSpec>().is_err());
        assert!("logits:f32:4xq".parse::<OutputSpec>().is_err());
        assert!(":f32:4".parse::<OutputSpec>().is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a_very_long_output_name", 10), "a_very_...");
    }

    #[test]
    fn test_overrides_apply() {
        let config = load_config(None, Some(PathBuf::from("/tmp/a.arena")), Some("1M".into())).unwrap();
        assert_eq!(config.arena_path, Some(PathBuf::from("/tmp/a.arena")));
        assert_eq!(config.arena_budget, "1M");
    }
}
