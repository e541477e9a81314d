// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device memory, inter-process handles and copy streams.
//!
//! Real device allocation, IPC export and asynchronous copies belong to the
//! device driver. This module defines the seams the response pipeline uses
//! ([`DeviceStream`], [`MemoryBuffer::ipc_handle`]) and a host-backed
//! simulation of them:
//!
//! - [`DeviceBuffer`]: a "device" allocation kept in host memory. Each one
//!   is exported under a fresh [`IpcMemHandle`] in a process-wide registry,
//!   and [`open_ipc_handle`] maps a handle back to the allocation, the way
//!   a driver maps a peer's handle.
//! - [`SimulatedStream`]: executes copies immediately and counts
//!   synchronisations.
//!
//! The simulation only resolves handles exported by the same process.

use crate::memory::check_bounds;
use crate::{DeviceError, IpcMemHandle, MemoryBuffer, MemoryLocation};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, Weak};

/// Exported allocations, keyed by the handle they were exported under.
static IPC_REGISTRY: LazyLock<Mutex<HashMap<IpcMemHandle, Weak<DeviceBuffer>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_ALLOCATION: AtomicU64 = AtomicU64::new(1);

/// A simulated device allocation.
pub struct DeviceBuffer {
    location: MemoryLocation,
    data: Mutex<Vec<u8>>,
    len: usize,
    allocation_id: u64,
    ipc_handle: IpcMemHandle,
}

impl DeviceBuffer {
    /// Allocates `len` zeroed bytes on device `device` and exports the
    /// allocation for IPC.
    pub fn new(device: i64, len: usize) -> Arc<Self> {
        let allocation_id = NEXT_ALLOCATION.fetch_add(1, Ordering::Relaxed);
        let mut raw = [0u8; 64];
        raw[..8].copy_from_slice(&allocation_id.to_le_bytes());
        raw[8..16].copy_from_slice(&device.to_le_bytes());
        raw[16..20].copy_from_slice(&std::process::id().to_le_bytes());
        let ipc_handle = IpcMemHandle(raw);

        let buffer = Arc::new(Self {
            location: MemoryLocation::gpu(device),
            data: Mutex::new(vec![0u8; len]),
            len,
            allocation_id,
            ipc_handle,
        });
        if let Ok(mut registry) = IPC_REGISTRY.lock() {
            registry.insert(ipc_handle, Arc::downgrade(&buffer));
        }
        buffer
    }

    /// Allocates on device `device` and fills the allocation with `data`.
    pub fn from_bytes(device: i64, data: &[u8]) -> Arc<Self> {
        let buffer = Self::new(device, data.len());
        if let Ok(mut dst) = buffer.data.lock() {
            dst.copy_from_slice(data);
        }
        buffer
    }
}

impl MemoryBuffer for DeviceBuffer {
    fn location(&self) -> MemoryLocation {
        self.location
    }

    fn len(&self) -> usize {
        self.len
    }

    fn address(&self) -> u64 {
        // A fake but unique device address per allocation.
        0x7f00_0000_0000 + (self.allocation_id << 20)
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), DeviceError> {
        check_bounds(offset, out.len(), self.len)?;
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        out.copy_from_slice(&data[offset..offset + out.len()]);
        Ok(())
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<(), DeviceError> {
        check_bounds(offset, src.len(), self.len)?;
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn ipc_handle(&self) -> Option<IpcMemHandle> {
        Some(self.ipc_handle)
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Ok(mut registry) = IPC_REGISTRY.lock() {
            registry.remove(&self.ipc_handle);
        }
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("location", &self.location)
            .field("len", &self.len)
            .field("allocation_id", &self.allocation_id)
            .finish()
    }
}

/// Maps an exported device allocation back from its IPC handle.
///
/// Fails if the allocation was freed or was never exported.
pub fn open_ipc_handle(handle: &IpcMemHandle) -> Result<Arc<dyn MemoryBuffer>, DeviceError> {
    let registry = IPC_REGISTRY
        .lock()
        .map_err(|_| DeviceError::IpcOpen("registry poisoned".into()))?;
    registry
        .get(handle)
        .and_then(Weak::upgrade)
        .map(|buffer| buffer as Arc<dyn MemoryBuffer>)
        .ok_or_else(|| DeviceError::IpcOpen(format!("{handle:?} is not exported")))
}

/// An ordered queue of device copies.
///
/// Copies may complete asynchronously; [`synchronize`](DeviceStream::synchronize)
/// blocks until everything issued so far has landed.
pub trait DeviceStream: Send + Sync {
    /// Queues a copy of `src` into device buffer `dst` at offset 0.
    fn copy_host_to_device(&self, src: &[u8], dst: &dyn MemoryBuffer) -> Result<(), DeviceError>;

    /// Queues a copy of device buffer `src` into host memory `dst`.
    fn copy_device_to_host(&self, src: &dyn MemoryBuffer, dst: &mut [u8]) -> Result<(), DeviceError>;

    /// Queues a copy between two device buffers.
    fn copy_device_to_device(
        &self,
        src: &dyn MemoryBuffer,
        dst: &dyn MemoryBuffer,
    ) -> Result<(), DeviceError>;

    /// Blocks until every queued copy has completed.
    fn synchronize(&self) -> Result<(), DeviceError>;
}

/// A stream that performs copies immediately and records what it did.
#[derive(Debug, Default)]
pub struct SimulatedStream {
    synchronize_calls: AtomicUsize,
    copies: AtomicUsize,
    bytes_copied: AtomicUsize,
    fail_synchronize: bool,
}

impl SimulatedStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stream whose `synchronize` always fails.
    pub fn failing_synchronize() -> Self {
        Self {
            fail_synchronize: true,
            ..Self::default()
        }
    }

    /// Number of `synchronize` calls so far.
    pub fn synchronize_calls(&self) -> usize {
        self.synchronize_calls.load(Ordering::Acquire)
    }

    /// Number of copies issued so far.
    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::Acquire)
    }

    pub fn bytes_copied(&self) -> usize {
        self.bytes_copied.load(Ordering::Acquire)
    }

    fn record_copy(&self, len: usize) {
        self.copies.fetch_add(1, Ordering::AcqRel);
        self.bytes_copied.fetch_add(len, Ordering::AcqRel);
    }
}

impl DeviceStream for SimulatedStream {
    fn copy_host_to_device(&self, src: &[u8], dst: &dyn MemoryBuffer) -> Result<(), DeviceError> {
        if !dst.location().is_device() {
            return Err(DeviceError::UnsupportedCopy {
                src: MemoryLocation::CPU,
                dst: dst.location(),
            });
        }
        dst.write(0, src)?;
        self.record_copy(src.len());
        Ok(())
    }

    fn copy_device_to_host(&self, src: &dyn MemoryBuffer, dst: &mut [u8]) -> Result<(), DeviceError> {
        if !src.location().is_device() {
            return Err(DeviceError::UnsupportedCopy {
                src: src.location(),
                dst: MemoryLocation::CPU,
            });
        }
        src.read(0, dst)?;
        self.record_copy(dst.len());
        Ok(())
    }

    fn copy_device_to_device(
        &self,
        src: &dyn MemoryBuffer,
        dst: &dyn MemoryBuffer,
    ) -> Result<(), DeviceError> {
        if !src.location().is_device() || !dst.location().is_device() {
            return Err(DeviceError::UnsupportedCopy {
                src: src.location(),
                dst: dst.location(),
            });
        }
        let bytes = src.to_vec()?;
        dst.write(0, &bytes)?;
        self.record_copy(bytes.len());
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        self.synchronize_calls.fetch_add(1, Ordering::AcqRel);
        if self.fail_synchronize {
            return Err(DeviceError::Synchronize("simulated stream failure".into()));
        }
        Ok(())
    }
}

/// Copies host-resident `src` into `dst`, choosing host-to-host or
/// host-to-device by the destination venue.
///
/// Returns `true` if the copy was queued on `stream`, in which case the
/// caller must synchronise the stream before the data may be read. Device
/// sources are rejected: they are filled through transfer descriptors by
/// the process that owns the device data.
pub fn copy_buffer(
    context: &'static str,
    src_location: MemoryLocation,
    src: &[u8],
    dst: &dyn MemoryBuffer,
    stream: &dyn DeviceStream,
) -> Result<bool, DeviceError> {
    let wrap = |source: DeviceError| DeviceError::Copy {
        context,
        source: Box::new(source),
    };

    if src_location.is_device() {
        return Err(wrap(DeviceError::UnsupportedCopy {
            src: src_location,
            dst: dst.location(),
        }));
    }

    if dst.location().is_device() {
        stream.copy_host_to_device(src, dst).map_err(wrap)?;
        Ok(true)
    } else {
        dst.write(0, src).map_err(wrap)?;
        Ok(false)
    }
}
