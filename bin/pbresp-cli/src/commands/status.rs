// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `pbresp status` command: display arena capacity and usage.
//!
//! Statistics are per process, so the region counts printed here only
//! cover the mapping this command opened.

use infer_response::ResponseConfig;

pub fn execute(config: &ResponseConfig) -> anyhow::Result<()> {
    let arena = config.open_arena()?;

    let capacity = arena.capacity();
    let used = arena.used_bytes();
    let ratio = if capacity == 0 { 0.0 } else { used as f64 / capacity as f64 };

    println!("  Arena");
    if let Some(path) = arena.path() {
        println!("   Path:         {}", path.display());
    }
    println!("   Capacity:     {:.1} KB", capacity as f64 / 1024.0);
    println!("   Used:         {:.1} KB ({:.1}%)  {}", used as f64 / 1024.0, ratio * 100.0, usage_bar(ratio));
    println!("   Available:    {:.1} KB", arena.available_bytes() as f64 / 1024.0);
    if ratio >= 0.9 {
        println!("   WARNING: arena is nearly full");
    }
    println!();
    println!("  {}", arena.stats().summary());

    Ok(())
}

/// Creates a visual usage bar (0.0-1.0 scale).
fn usage_bar(ratio: f64) -> String {
    let filled = ((ratio * 20.0).round() as usize).min(20);
    let symbol = if ratio >= 0.9 {
        "#"
    } else if ratio >= 0.7 {
        "="
    } else {
        "-"
    };
    format!("[{}{}]", symbol.repeat(filled), ".".repeat(20 - filled))
}
