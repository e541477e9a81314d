// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The error value object a failed model step produces.

use shm_arena::{load_string, save_string, ArenaError, ShmArena, ShmHandle};

/// Message reported when a response was flagged as failed but its error
/// could not be decoded.
pub const UNRETRIEVABLE_ERROR_MESSAGE: &str = "Failed to retrieve the response error.";

/// An inference error, carried instead of outputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct InferError {
    message: String,
}

impl InferError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error reported for a response whose error record is missing.
    pub fn unretrievable() -> Self {
        Self::new(UNRETRIEVABLE_ERROR_MESSAGE)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stores the message in `arena` and returns its handle.
    pub fn save_to_shm(&self, arena: &ShmArena) -> Result<ShmHandle, ArenaError> {
        save_string(arena, &self.message)
    }

    pub fn load_from_shm(arena: &ShmArena, handle: ShmHandle) -> Result<Self, ArenaError> {
        load_string(arena, handle).map(Self::new)
    }
}
