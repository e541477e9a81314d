// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Delivery metrics.
//!
//! [`DeliveryMetrics`] counts which placement branch each output took
//! during one [`Response::send`](crate::Response::send) call.

use crate::TransferKind;
use std::time::Duration;

/// Counters for a single delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeliveryMetrics {
    /// Outputs declared on the host.
    pub outputs: usize,
    /// Outputs copied synchronously into host memory.
    pub host_copies: usize,
    /// Outputs copied synchronously into device memory through the stream.
    pub device_copies: usize,
    /// Device outputs handed over by IPC reference.
    pub references: usize,
    /// Device outputs whose copy completes after the call returns.
    pub deferred_copies: usize,
    /// Device outputs granted host memory.
    pub placeholders: usize,
    /// Bytes copied synchronously.
    pub bytes_copied: usize,
    /// Whether the device stream was synchronised.
    pub stream_synchronized: bool,
    /// Wall-clock time of the call.
    pub duration: Duration,
}

impl DeliveryMetrics {
    pub fn record_copy(&mut self, bytes: usize, on_device: bool) {
        if on_device {
            self.device_copies += 1;
        } else {
            self.host_copies += 1;
        }
        self.bytes_copied += bytes;
    }

    pub fn record_transfer(&mut self, kind: TransferKind) {
        match kind {
            TransferKind::Reference => self.references += 1,
            TransferKind::Copy => self.deferred_copies += 1,
            TransferKind::Placeholder => self.placeholders += 1,
        }
    }

    /// Outputs that still need a fill after the call.
    pub fn pending_fills(&self) -> usize {
        self.references + self.deferred_copies + self.placeholders
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let kb = self.bytes_copied as f64 / 1024.0;
        format!(
            "Delivery: {} outputs in {:.3}ms, {} host + {} device copies ({:.1} KB), \
             {} references, {} deferred copies, {} placeholders, stream {}",
            self.outputs,
            self.duration.as_secs_f64() * 1000.0,
            self.host_copies,
            self.device_copies,
            kb,
            self.references,
            self.deferred_copies,
            self.placeholders,
            if self.stream_synchronized { "synchronised" } else { "idle" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let m = DeliveryMetrics::default();
        assert_eq!(m.pending_fills(), 0);
        assert!(m.summary().contains("0 outputs"));
        assert!(m.summary().ends_with("stream idle"));
    }

    #[test]
    fn test_record() {
        let mut m = DeliveryMetrics::default();
        m.record_copy(2048, false);
        m.record_copy(1024, true);
        m.record_transfer(TransferKind::Reference);
        m.record_transfer(TransferKind::Copy);
        m.record_transfer(TransferKind::Placeholder);
        assert_eq!(m.host_copies, 1);
        assert_eq!(m.device_copies, 1);
        assert_eq!(m.bytes_copied, 3072);
        assert_eq!(m.pending_fills(), 3);
        assert!(m.summary().contains("(3.0 KB)"));
    }

    #[test]
    fn test_serialises_to_json() {
        let mut m = DeliveryMetrics::default();
        m.record_transfer(TransferKind::Copy);
        let json: serde_json::Value = serde_json::to_value(&m).unwrap();
        assert_eq!(json["deferred_copies"], 1);
        assert_eq!(json["stream_synchronized"], false);
    }
}
