// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `pbresp decode` command: map an arena and print one response.

use super::truncate;
use infer_response::{Response, ResponseConfig};
use shm_arena::ShmHandle;

pub fn execute(config: &ResponseConfig, handle: ShmHandle) -> anyhow::Result<()> {
    let arena = config.open_arena()?;
    let response = Response::load_from_shm(&arena, handle, config.open_device_handle)
        .map_err(|e| anyhow::anyhow!("failed to decode response {handle}: {e}"))?;

    println!("  Response: {handle}");
    print_response(&response);
    Ok(())
}

/// Prints a response's error, or a table of its outputs.
pub fn print_response(response: &Response) {
    if let Some(error) = response.error() {
        println!("  Status:   FAILED");
        println!("  Error:    {}", error.message());
        return;
    }

    println!("  Status:   ok, {} outputs", response.outputs().len());
    println!();
    println!(
        "  {:<4} {:<24} {:<5} {:<16} {:>10} {:<8} {}",
        "Idx", "Name", "DType", "Shape", "Bytes", "Venue", "Preview",
    );
    println!("  {}", "-".repeat(86));
    for (i, tensor) in response.outputs().iter().enumerate() {
        let preview = match tensor.to_f32_vec() {
            Some(values) => preview_f32(&values),
            None if tensor.is_device_resident() => "(device)".to_string(),
            None => String::new(),
        };
        println!(
            "  {:<4} {:<24} {:<5} {:<16} {:>10} {:<8} {}",
            i,
            truncate(tensor.name(), 24),
            tensor.dtype(),
            truncate(&format!("{:?}", tensor.shape().dims()), 16),
            tensor.byte_size(),
            tensor.memory_location().to_string(),
            preview,
        );
    }
}

fn preview_f32(values: &[f32]) -> String {
    let shown: Vec<String> = values.iter().take(4).map(|v| format!("{v:.3}")).collect();
    if values.len() > 4 {
        format!("[{}, ...]", shown.join(", "))
    } else {
        format!("[{}]", shown.join(", "))
    }
}
