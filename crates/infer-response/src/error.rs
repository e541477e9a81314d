// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for building, encoding and decoding responses.
//!
//! Delivery failures are not in here: they travel as a
//! [`HostError`](crate::HostError) inside the [`SendOutcome`](crate::SendOutcome).

/// Errors that can occur while constructing or (de)serialising a response.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// A constructor argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocating or resolving an arena region failed.
    #[error("shared memory error: {0}")]
    Arena(#[from] shm_arena::ArenaError),

    /// An output tensor could not be saved or loaded.
    #[error("tensor error: {0}")]
    Tensor(#[from] tensor_core::TensorError),

    /// A response or transfer record in shared memory is malformed.
    #[error("invalid shared-memory layout: {0}")]
    InvalidLayout(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
