// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the shared-memory arena.

use crate::ShmHandle;

/// Errors that can occur while allocating or resolving arena regions.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// The requested region does not fit in the remaining arena capacity.
    #[error("out of shared memory: requested {requested_bytes} bytes, but only {available_bytes} available (capacity: {capacity_bytes})")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
        capacity_bytes: usize,
    },

    /// Attempted to construct a zero-sized region.
    #[error("cannot construct zero-sized region")]
    ZeroSizedAllocation,

    /// A handle does not resolve to a live region in this arena.
    #[error("invalid shared-memory handle {handle}: {reason}")]
    InvalidHandle { handle: ShmHandle, reason: String },

    /// A read or write fell outside the bounds of a region.
    #[error("access out of bounds in region {handle}: offset {offset} + {len} exceeds {region_len}")]
    OutOfBounds {
        handle: ShmHandle,
        offset: usize,
        len: usize,
        region_len: usize,
    },

    /// The budget string could not be parsed.
    #[error("invalid budget: {0}")]
    InvalidBudget(String),

    /// The mapping header is missing, truncated or from another layout version.
    #[error("corrupt arena: {0}")]
    CorruptArena(String),

    /// A string region did not hold valid UTF-8.
    #[error("string region {handle} is not valid UTF-8")]
    InvalidUtf8 { handle: ShmHandle },

    /// Creating, sizing or mapping the backing file failed.
    #[error("arena I/O error: {0}")]
    Io(#[from] std::io::Error),
}
