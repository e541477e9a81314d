// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `pbresp encode` command: write a synthetic response into a new arena.
//!
//! The arena's backing file is created (or truncated) at the configured
//! path, so that `decode` and `deliver` can map it afterwards. F32 outputs
//! carry a ramp of values; other dtypes are zero-filled.

use super::{truncate, OutputSpec};
use infer_response::{InferError, Response, ResponseConfig};
use std::sync::Arc;
use tensor_core::{DType, Shape, Tensor};

pub fn execute(config: &ResponseConfig, outputs: Vec<OutputSpec>, error: Option<String>) -> anyhow::Result<()> {
    let path = config
        .arena_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("encode needs a file-backed arena: pass --arena or set arena_path"))?;

    let outputs = if outputs.is_empty() && error.is_none() {
        vec![OutputSpec {
            name: "logits".to_string(),
            dtype: DType::F32,
            shape: Shape::matrix(1, 1000),
        }]
    } else {
        outputs
    };

    let tensors = outputs
        .iter()
        .map(|output| synthetic_tensor(output).map(|t| Some(Arc::new(t))))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut response = Response::new(tensors, error.map(InferError::new))?;

    let arena = config.create_arena()?;
    let handle = response.save_to_shm(&arena, config.copy_device_data)?;
    tracing::info!(%handle, path = %path.display(), "response encoded");

    println!("  Arena:    {}", path.display());
    println!("  Capacity: {} bytes ({} used)", arena.capacity(), arena.used_bytes());
    match response.error() {
        Some(error) => println!("  Error:    \"{}\"", truncate(error.message(), 60)),
        None => {
            for tensor in response.outputs() {
                println!(
                    "  Output:   {:<24} {:<5} {:?} ({} bytes)",
                    truncate(tensor.name(), 24),
                    tensor.dtype(),
                    tensor.shape().dims(),
                    tensor.byte_size(),
                );
            }
        }
    }
    println!();
    // Last line is the bare handle, for scripts.
    println!("{handle}");
    Ok(())
}

fn synthetic_tensor(output: &OutputSpec) -> anyhow::Result<Tensor> {
    let bytes = output
        .shape
        .checked_size_bytes(output.dtype)
        .ok_or_else(|| anyhow::anyhow!("output '{}' is too large", output.name))?;
    tracing::debug!(name = %output.name, dtype = %output.dtype, bytes, "building synthetic output");

    if output.dtype == DType::F32 {
        let values: Vec<f32> = (0..output.shape.num_elements()).map(|i| i as f32 * 0.001).collect();
        Ok(Tensor::from_f32(output.name.clone(), output.shape.clone(), &values)?)
    } else {
        Ok(Tensor::zeros(output.name.clone(), output.shape.clone(), output.dtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_f32_ramp() {
        let output: OutputSpec = "logits:f32:1x4".parse().unwrap();
        let tensor = synthetic_tensor(&output).unwrap();
        let values = tensor.to_f32_vec().unwrap();
        assert_eq!(values.len(), 4);
        assert!((values[3] - 0.003).abs() < 1e-6);
    }

    #[test]
    fn test_synthetic_zero_fill() {
        let output: OutputSpec = "ids:i64:3".parse().unwrap();
        let tensor = synthetic_tensor(&output).unwrap();
        assert_eq!(tensor.byte_size(), 24);
        assert!(tensor.host_data().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_requires_arena_path() {
        let config = ResponseConfig::default();
        assert!(execute(&config, vec![], None).is_err());
    }

    #[test]
    fn test_encode_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResponseConfig {
            arena_path: Some(dir.path().join("cli.arena")),
            arena_budget: "1M".into(),
            ..Default::default()
        };
        execute(&config, vec![], None).unwrap();
        assert!(dir.path().join("cli.arena").exists());
    }
}
