// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # infer-response
//!
//! Inference responses that cross a process boundary: built by a
//! model-execution worker, encoded into a shared-memory arena, decoded by
//! the serving side and delivered to the host's response channel.
//!
//! ```text
//! worker:  Response::new ──► save_to_shm ──► ShmHandle
//!                                               │
//! host:    Response::load_from_shm ◄────────────┘
//!              │ prune_output_tensors
//!              ▼
//!          Response::send ──► HostChannel (declare, buffer, send)
//!              │
//!              └─ deferred copy? ──► deferred_send_callback()
//! ```
//!
//! The crate takes:
//! - An arena from `shm-arena`, for every record it writes.
//! - Tensors, device streams and memory buffers from `tensor-core`.
//! - A [`HostChannel`] implementation from the embedding server.
//!
//! A response is either outputs or an error ([`ResponsePayload`]), never
//! both. The host-visible send of each response happens exactly once,
//! through a [`SendGuard`].

mod config;
mod error;
mod guard;
mod host;
mod infer_error;
mod metrics;
mod response;
mod send;
mod shm;
mod transfer;

pub use config::ResponseConfig;
pub use error::ResponseError;
pub use guard::{DeferredCompletion, SendGuard};
pub use host::{
    BufferAttributes, GrantedBuffer, HostChannel, HostError, HostErrorKind, ResponseFlags,
    ResponseTarget,
};
pub use infer_error::{InferError, UNRETRIEVABLE_ERROR_MESSAGE};
pub use metrics::DeliveryMetrics;
pub use response::{NextResponse, NextResponseSender, Response, ResponsePayload};
pub use send::SendOutcome;
pub use transfer::{OutputBuffer, OutputTransfer, TransferKind};
