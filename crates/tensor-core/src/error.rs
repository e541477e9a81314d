// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensors, memory buffers and device copies.

use crate::MemoryLocation;

/// Errors raised by buffer reads, writes and device copies.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// A read or write fell outside the buffer.
    #[error("buffer access out of bounds: offset {offset} + {len} exceeds {buffer_len}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        buffer_len: usize,
    },

    /// A copy was requested between buffers the stream cannot address.
    #[error("unsupported copy from {src} to {dst}")]
    UnsupportedCopy {
        src: MemoryLocation,
        dst: MemoryLocation,
    },

    /// An IPC handle did not match any exported device allocation.
    #[error("cannot open IPC memory handle: {0}")]
    IpcOpen(String),

    /// Labelled failure from a higher-level copy helper.
    #[error("{context}: {source}")]
    Copy {
        context: &'static str,
        #[source]
        source: Box<DeviceError>,
    },

    /// Stream synchronisation failed.
    #[error("stream synchronisation failed: {0}")]
    Synchronize(String),
}

/// Errors that can occur while building or (de)serialising tensors.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("shape mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// A shared-memory record carried a dtype wire code this build does not know.
    #[error("unknown dtype code {0}")]
    UnknownDType(u32),

    /// A shared-memory tensor record is internally inconsistent.
    #[error("invalid tensor record: {0}")]
    InvalidRecord(String),

    /// The operation needs device-resident data but the tensor has none, or
    /// the other way round.
    #[error("tensor '{name}' is not resident where required: {detail}")]
    WrongResidency { name: String, detail: String },

    /// Allocating or resolving an arena region failed.
    #[error("shared memory error: {0}")]
    Arena(#[from] shm_arena::ArenaError),

    /// A device read, write or IPC open failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}
