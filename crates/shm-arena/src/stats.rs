// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocation statistics for profiling and diagnostics.
//!
//! [`AllocationStats`] are kept per process: each process mapping the same
//! arena sees only the constructs and loads it performed itself.

/// Cumulative statistics about arena usage in this process.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AllocationStats {
    /// Number of successful region constructions.
    pub total_allocations: u64,
    /// Number of constructions rejected because the arena was full.
    pub oom_count: u64,
    /// Total payload bytes handed out by successful constructions.
    pub cumulative_allocated_bytes: u64,
    /// Highest allocation cursor observed, in bytes from the mapping base.
    pub peak_used_bytes: usize,
    /// Number of successful handle lookups.
    pub total_loads: u64,
    /// Number of lookups rejected as invalid handles.
    pub invalid_handle_count: u64,
}

impl AllocationStats {
    pub(crate) fn record_allocation(&mut self, size: usize) {
        self.total_allocations += 1;
        self.cumulative_allocated_bytes += size as u64;
    }

    pub(crate) fn record_oom(&mut self) {
        self.oom_count += 1;
    }

    pub(crate) fn record_load(&mut self) {
        self.total_loads += 1;
    }

    pub(crate) fn record_invalid_handle(&mut self) {
        self.invalid_handle_count += 1;
    }

    /// Updates the high-water mark if needed.
    pub(crate) fn update_peak(&mut self, used_bytes: usize) {
        if used_bytes > self.peak_used_bytes {
            self.peak_used_bytes = used_bytes;
        }
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_kb = self.peak_used_bytes as f64 / 1024.0;
        format!(
            "Regions: {} constructed ({} bytes), {} OOMs, {} loads ({} invalid), peak {:.1} KB",
            self.total_allocations,
            self.cumulative_allocated_bytes,
            self.oom_count,
            self.total_loads,
            self.invalid_handle_count,
            peak_kb,
        )
    }
}
