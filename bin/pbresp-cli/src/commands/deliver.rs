// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `pbresp deliver` command: decode a response and send it to a loopback host.
//!
//! ```text
//! load_from_shm → prune_output_tensors → send → (deferred_send_callback)
//! ```

use super::host::{LoopbackHost, Placement};
use super::truncate;
use infer_response::{Response, ResponseConfig, ResponseFlags, ResponseTarget};
use shm_arena::ShmHandle;
use std::collections::HashSet;
use std::sync::Arc;
use tensor_core::SimulatedStream;

/// Request id the loopback host's single factory stands for.
const REQUEST_ID: u64 = 1;

pub fn execute(
    config: &ResponseConfig,
    handle: ShmHandle,
    requested: Option<Vec<String>>,
    placement: Placement,
) -> anyhow::Result<()> {
    let arena = config.open_arena()?;
    let mut response = Response::load_from_shm(&arena, handle, config.open_device_handle)
        .map_err(|e| anyhow::anyhow!("failed to decode response {handle}: {e}"))?;

    if let Some(names) = requested {
        let names: HashSet<String> = names.into_iter().collect();
        response.prune_output_tensors(&names);
        tracing::debug!(kept = response.outputs().len(), "outputs pruned");
    }

    let host = Arc::new(LoopbackHost::new(placement));
    let stream = SimulatedStream::new();
    let outcome = response.send(
        &host,
        ResponseTarget::Factory(REQUEST_ID),
        ResponseFlags::FINAL,
        &stream,
        &arena,
    );
    if outcome.requires_deferred_callback {
        tracing::info!(pending = outcome.output_buffers.len(), "completing deferred send");
        response.deferred_send_callback();
    }

    if config.log_metrics {
        tracing::info!("{}", outcome.metrics.summary());
    }

    println!("  Response: {handle}  (placement: {placement:?})");
    for delivered in host.delivered() {
        println!("  Request:  {}  flags={}", delivered.request, flag_label(delivered.flags));
        if let Some(error) = &delivered.error {
            println!("  Error:    {error}");
        }
        for output in &delivered.outputs {
            println!(
                "   {:<24} {:<5} {:<16} {:>10} bytes  at {}",
                truncate(&output.name, 24),
                output.dtype,
                truncate(&format!("{:?}", output.shape.dims()), 16),
                output.byte_size,
                output.location,
            );
        }
    }
    println!();
    println!("  {}", outcome.metrics.summary());
    println!(
        "  Stream:   {} copies, {} bytes, {} syncs",
        stream.copies(),
        stream.bytes_copied(),
        stream.synchronize_calls()
    );
    println!("  Pending fills:    {}", outcome.metrics.pending_fills());
    println!("  Factory released: {}", !host.released().is_empty());

    match outcome.error {
        Some(error) => Err(anyhow::anyhow!("delivery failed: {error}")),
        None => Ok(()),
    }
}

/// `FINAL`, `NONE`, or the raw bits when other flags are set.
fn flag_label(flags: ResponseFlags) -> String {
    if flags == ResponseFlags::NONE {
        "NONE".to_string()
    } else if flags.is_final() {
        "FINAL".to_string()
    } else if flags.contains(ResponseFlags::FINAL) {
        format!("FINAL|{:#x}", flags.bits() & !ResponseFlags::FINAL.bits())
    } else {
        format!("{:#x}", flags.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{Shape, Tensor};

    fn encoded(dir: &std::path::Path) -> (ResponseConfig, ShmHandle) {
        let config = ResponseConfig {
            arena_path: Some(dir.join("cli.arena")),
            arena_budget: "1M".into(),
            ..Default::default()
        };
        let arena = config.create_arena().unwrap();
        let outputs = ["logits", "hidden"]
            .iter()
            .map(|name| Arc::new(Tensor::from_f32(*name, Shape::vector(2), &[1.0, 2.0]).unwrap()))
            .collect();
        let handle = Response::from_outputs(outputs).save_to_shm(&arena, false).unwrap();
        (config, handle)
    }

    #[test]
    fn test_deliver_to_each_placement() {
        let dir = tempfile::tempdir().unwrap();
        let (config, handle) = encoded(dir.path());
        for placement in [Placement::AsRequested, Placement::Host, Placement::Pinned, Placement::Device] {
            execute(&config, handle, None, placement).unwrap();
        }
    }

    #[test]
    fn test_deliver_requested_subset() {
        let dir = tempfile::tempdir().unwrap();
        let (config, handle) = encoded(dir.path());
        execute(&config, handle, Some(vec!["logits".into()]), Placement::Host).unwrap();
    }

    #[test]
    fn test_flag_label() {
        assert_eq!(flag_label(ResponseFlags::NONE), "NONE");
        assert_eq!(flag_label(ResponseFlags::FINAL), "FINAL");
        assert_eq!(flag_label(ResponseFlags::from_bits(0b101)), "FINAL|0x4");
        assert_eq!(flag_label(ResponseFlags::from_bits(0b100)), "0x4");
    }
}
