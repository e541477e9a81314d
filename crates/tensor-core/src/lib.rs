// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor value objects for model outputs, with memory placement and
//! shared-memory serialisation.
//!
//! This crate provides:
//! - [`Tensor`]: a named, typed n-dimensional tensor whose data lives in
//!   host memory or in a device allocation.
//! - [`Shape`] and [`DType`]: shape descriptors and element types with
//!   stable wire codes.
//! - [`MemoryLocation`] and [`MemoryBuffer`]: the memory venue of a buffer
//!   and the byte-level interface to it.
//! - [`DeviceStream`] and [`copy_buffer`]: the copy seam between host and
//!   device, with a host-backed [`SimulatedStream`] and [`DeviceBuffer`].
//! - `Tensor::save_to_shm` / `Tensor::load_from_shm`: encoding into a
//!   [`shm_arena::ShmArena`].
//!
//! # Design Goals
//! - Device data crosses process boundaries by IPC handle, never by pointer.
//! - Everything read back from shared memory is validated before use.
//! - Clean error types via `thiserror`.

mod device;
mod dtype;
mod error;
mod memory;
mod shape;
mod shm;
mod tensor;

pub use device::{copy_buffer, open_ipc_handle, DeviceBuffer, DeviceStream, SimulatedStream};
pub use dtype::DType;
pub use error::{DeviceError, TensorError};
pub use memory::{HostBuffer, IpcMemHandle, MemoryBuffer, MemoryLocation, MemoryType};
pub use shape::Shape;
pub use tensor::Tensor;
