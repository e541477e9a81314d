// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shared-memory encoding of [`Tensor`].
//!
//! A tensor is stored as up to three arena regions:
//!
//! ```text
//! record region : TensorShm (112 bytes) | dims: rank x u64
//! name region   : length-prefixed UTF-8 (see shm_arena::save_string)
//! data region   : byte_size raw bytes   (host-inline tensors only)
//! ```
//!
//! Device tensors are either staged into the data region on save (so the
//! reader sees a host tensor) or carried by IPC handle, in which case the
//! reader maps the peer allocation itself.

use crate::tensor::Storage;
use crate::{
    open_ipc_handle, DType, IpcMemHandle, MemoryBuffer, MemoryLocation, MemoryType, Shape, Tensor,
    TensorError,
};
use shm_arena::{load_string, save_string, ShmArena, ShmHandle};

const STORAGE_HOST_INLINE: u32 = 0;
const STORAGE_DEVICE_IPC: u32 = 1;

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct TensorShm {
    dtype: u32,
    memory_type: u32,
    memory_type_id: i64,
    byte_size: u64,
    storage: u32,
    rank: u32,
    name: u64,
    data: u64,
    ipc_handle: IpcMemHandle,
}

const RECORD_SIZE: usize = std::mem::size_of::<TensorShm>();
const DIM_SIZE: usize = std::mem::size_of::<u64>();

impl Tensor {
    /// Writes the tensor into `arena` and returns the handle of its record.
    ///
    /// With `copy_device_data` a device tensor's bytes are copied into the
    /// arena and the record describes a `cpu:0` tensor. Without it the
    /// record carries the allocation's IPC handle, and saving fails if the
    /// allocation was never exported.
    pub fn save_to_shm(&self, arena: &ShmArena, copy_device_data: bool) -> Result<ShmHandle, TensorError> {
        let name = save_string(arena, self.name())?;

        let (storage, location, data, ipc_handle) = match self.storage() {
            Storage::Host(bytes) => (
                STORAGE_HOST_INLINE,
                self.memory_location(),
                save_data(arena, bytes)?,
                no_ipc_handle(),
            ),
            Storage::Device(_) | Storage::DeviceHandle(_) if copy_device_data => {
                let bytes = self.to_host_bytes()?;
                (
                    STORAGE_HOST_INLINE,
                    MemoryLocation::CPU,
                    save_data(arena, &bytes)?,
                    no_ipc_handle(),
                )
            }
            Storage::Device(_) | Storage::DeviceHandle(_) => {
                let handle = self.ipc_handle().ok_or_else(|| TensorError::WrongResidency {
                    name: self.name().to_string(),
                    detail: "device allocation has no IPC handle".into(),
                })?;
                (STORAGE_DEVICE_IPC, self.memory_location(), ShmHandle::NULL, handle)
            }
        };

        let dims = self.shape().to_wire();
        let record = TensorShm {
            dtype: self.dtype().code(),
            memory_type: location.kind.code(),
            memory_type_id: location.id,
            byte_size: self.byte_size() as u64,
            storage,
            rank: dims.len() as u32,
            name: name.as_raw(),
            data: data.as_raw(),
            ipc_handle,
        };

        let region = arena.construct(RECORD_SIZE + dims.len() * DIM_SIZE)?;
        region.write_pod(0, &record)?;
        region.write_pod_slice(RECORD_SIZE, &dims)?;

        tracing::trace!(
            tensor = self.name(),
            handle = %region.handle(),
            bytes = self.byte_size(),
            inline = storage == STORAGE_HOST_INLINE,
            "saved tensor to shared memory"
        );
        Ok(region.handle())
    }

    /// Reads a tensor record written by [`save_to_shm`](Self::save_to_shm).
    ///
    /// Host-inline data is copied out of the arena. For IPC-carried device
    /// data, `open_device_handle` maps the peer allocation immediately;
    /// otherwise the tensor keeps only the handle and can be opened later
    /// with [`Tensor::open_device_handle`].
    pub fn load_from_shm(
        arena: &ShmArena,
        handle: ShmHandle,
        open_device_handle: bool,
    ) -> Result<Tensor, TensorError> {
        let region = arena.load(handle)?;
        if region.len() < RECORD_SIZE {
            return Err(invalid(format!(
                "region {handle} holds {} bytes, a tensor record needs {RECORD_SIZE}",
                region.len()
            )));
        }
        let record: TensorShm = region.read_pod(0)?;

        let rank = record.rank as usize;
        let expected_len = rank
            .checked_mul(DIM_SIZE)
            .and_then(|n| n.checked_add(RECORD_SIZE));
        if expected_len != Some(region.len()) {
            return Err(invalid(format!(
                "rank {rank} does not fit a {} byte record region",
                region.len()
            )));
        }

        let dtype = DType::from_code(record.dtype).ok_or(TensorError::UnknownDType(record.dtype))?;
        let kind = MemoryType::from_code(record.memory_type)
            .ok_or_else(|| invalid(format!("unknown memory type {}", record.memory_type)))?;
        let location = MemoryLocation::new(kind, record.memory_type_id);

        let dims = region.read_pod_slice::<u64>(RECORD_SIZE, rank)?;
        let shape = Shape::from_wire(&dims).ok_or_else(|| invalid(format!("dimensions {dims:?} overflow")))?;
        let byte_size = shape
            .checked_size_bytes(dtype)
            .ok_or_else(|| invalid(format!("shape {shape} overflows")))?;
        if byte_size as u64 != record.byte_size {
            return Err(invalid(format!(
                "byte size {} disagrees with {dtype} {shape}",
                record.byte_size
            )));
        }

        let name = load_string(arena, ShmHandle::from_raw(record.name))?;

        let storage = match record.storage {
            STORAGE_HOST_INLINE => {
                if location.is_device() {
                    return Err(invalid(format!("inline data for {location} tensor '{name}'")));
                }
                Storage::Host(load_data(arena, ShmHandle::from_raw(record.data), byte_size)?)
            }
            STORAGE_DEVICE_IPC => {
                if !location.is_device() || record.ipc_handle.is_zeroed() {
                    return Err(invalid(format!("tensor '{name}' has no usable IPC handle")));
                }
                if open_device_handle {
                    let buffer = open_ipc_handle(&record.ipc_handle)?;
                    if buffer.len() < byte_size {
                        return Err(TensorError::BufferSizeMismatch {
                            expected: byte_size,
                            actual: buffer.len(),
                        });
                    }
                    Storage::Device(buffer)
                } else {
                    Storage::DeviceHandle(record.ipc_handle)
                }
            }
            other => return Err(invalid(format!("unknown storage kind {other}"))),
        };

        tracing::trace!(tensor = %name, %handle, bytes = byte_size, "loaded tensor from shared memory");
        Ok(Tensor::from_parts(name, shape, dtype, location, storage))
    }
}

fn save_data(arena: &ShmArena, bytes: &[u8]) -> Result<ShmHandle, TensorError> {
    if bytes.is_empty() {
        return Ok(ShmHandle::NULL);
    }
    let region = arena.construct(bytes.len())?;
    region.write_bytes(0, bytes)?;
    Ok(region.handle())
}

fn load_data(arena: &ShmArena, handle: ShmHandle, byte_size: usize) -> Result<Vec<u8>, TensorError> {
    if byte_size == 0 {
        return Ok(Vec::new());
    }
    let region = arena.load(handle)?;
    if region.len() < byte_size {
        return Err(TensorError::BufferSizeMismatch {
            expected: byte_size,
            actual: region.len(),
        });
    }
    Ok(region.read_bytes(0, byte_size)?)
}

fn no_ipc_handle() -> IpcMemHandle {
    bytemuck::Zeroable::zeroed()
}

fn invalid(detail: String) -> TensorError {
    TensorError::InvalidRecord(detail)
}
