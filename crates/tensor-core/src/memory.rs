// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory placement and the buffer abstraction shared by host and device.
//!
//! Every tensor and every output buffer granted by the serving host lives in
//! a *venue*: plain host memory, pinned (page-locked) host memory, or device
//! memory on a numbered device. [`MemoryLocation`] names that venue, and
//! [`MemoryBuffer`] is the narrow interface the response pipeline reads and
//! writes buffers through, whatever venue they live in.

use crate::DeviceError;
use std::fmt;
use std::sync::Mutex;

/// The kind of memory a buffer lives in.
///
/// Wire codes follow the serving host's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Cpu,
    CpuPinned,
    Gpu,
}

impl MemoryType {
    pub fn code(self) -> u32 {
        match self {
            MemoryType::Cpu => 0,
            MemoryType::CpuPinned => 1,
            MemoryType::Gpu => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<MemoryType> {
        match code {
            0 => Some(MemoryType::Cpu),
            1 => Some(MemoryType::CpuPinned),
            2 => Some(MemoryType::Gpu),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Cpu => "cpu",
            MemoryType::CpuPinned => "cpu_pinned",
            MemoryType::Gpu => "gpu",
        }
    }
}

/// A memory venue: kind plus location id (the device ordinal for
/// [`MemoryType::Gpu`], normally 0 for host memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MemoryLocation {
    pub kind: MemoryType,
    pub id: i64,
}

impl MemoryLocation {
    /// Plain host memory.
    pub const CPU: MemoryLocation = MemoryLocation {
        kind: MemoryType::Cpu,
        id: 0,
    };

    pub fn new(kind: MemoryType, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn pinned(id: i64) -> Self {
        Self::new(MemoryType::CpuPinned, id)
    }

    pub fn gpu(device: i64) -> Self {
        Self::new(MemoryType::Gpu, device)
    }

    /// Returns `true` for device memory. Pinned memory is host memory.
    pub fn is_device(&self) -> bool {
        self.kind == MemoryType::Gpu
    }
}

impl fmt::Display for MemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// An opaque inter-process handle to a device allocation.
///
/// The 64 bytes are meaningful only to the device driver that exported
/// them; another process passes them back to the driver to map the same
/// allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub struct IpcMemHandle(pub [u8; 64]);

impl IpcMemHandle {
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for IpcMemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IpcMemHandle(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// A buffer in some memory venue.
///
/// `read` and `write` are the raw byte movers for that venue; for device
/// memory they stand in for the driver's synchronous memcpy. The response
/// pipeline itself only writes host buffers directly and hands device
/// writes to a [`DeviceStream`](crate::DeviceStream).
pub trait MemoryBuffer: Send + Sync + fmt::Debug {
    /// Where the buffer lives.
    fn location(&self) -> MemoryLocation;

    /// Size in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The buffer's address in its own venue, for diagnostics.
    fn address(&self) -> u64;

    /// Copies `out.len()` bytes starting at `offset` into `out`.
    fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), DeviceError>;

    /// Copies `data` into the buffer at `offset`.
    fn write(&self, offset: usize, data: &[u8]) -> Result<(), DeviceError>;

    /// The inter-process handle for this allocation, if it was exported.
    fn ipc_handle(&self) -> Option<IpcMemHandle> {
        None
    }

    /// Reads the whole buffer.
    fn to_vec(&self) -> Result<Vec<u8>, DeviceError> {
        let mut out = vec![0u8; self.len()];
        self.read(0, &mut out)?;
        Ok(out)
    }
}

pub(crate) fn check_bounds(offset: usize, len: usize, buffer_len: usize) -> Result<(), DeviceError> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer_len => Ok(()),
        _ => Err(DeviceError::OutOfBounds {
            offset,
            len,
            buffer_len,
        }),
    }
}

/// A host-memory buffer, plain or pinned.
pub struct HostBuffer {
    location: MemoryLocation,
    data: Mutex<Vec<u8>>,
    address: u64,
}

impl HostBuffer {
    /// Allocates a zero-filled buffer in plain host memory.
    pub fn new(len: usize) -> Self {
        Self::with_location(vec![0u8; len], MemoryLocation::CPU)
    }

    /// Allocates a zero-filled buffer reported as pinned memory.
    pub fn pinned(len: usize, id: i64) -> Self {
        Self::with_location(vec![0u8; len], MemoryLocation::pinned(id))
    }

    /// Wraps existing bytes as a plain host buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::with_location(data, MemoryLocation::CPU)
    }

    fn with_location(data: Vec<u8>, location: MemoryLocation) -> Self {
        debug_assert!(!location.is_device());
        // The Vec is never resized, so its heap address is stable.
        let address = data.as_ptr() as u64;
        Self {
            location,
            data: Mutex::new(data),
            address,
        }
    }
}

impl MemoryBuffer for HostBuffer {
    fn location(&self) -> MemoryLocation {
        self.location
    }

    fn len(&self) -> usize {
        self.data.lock().map(|d| d.len()).unwrap_or(0)
    }

    fn address(&self) -> u64 {
        self.address
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), DeviceError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        check_bounds(offset, out.len(), data.len())?;
        out.copy_from_slice(&data[offset..offset + out.len()]);
        Ok(())
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<(), DeviceError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        check_bounds(offset, src.len(), data.len())?;
        data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("location", &self.location)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_codes() {
        for kind in [MemoryType::Cpu, MemoryType::CpuPinned, MemoryType::Gpu] {
            assert_eq!(MemoryType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(MemoryType::from_code(7), None);
    }

    #[test]
    fn test_location_is_device() {
        assert!(!MemoryLocation::CPU.is_device());
        assert!(!MemoryLocation::pinned(0).is_device());
        assert!(MemoryLocation::gpu(1).is_device());
    }

    #[test]
    fn test_location_display() {
        assert_eq!(MemoryLocation::gpu(3).to_string(), "gpu:3");
        assert_eq!(MemoryLocation::pinned(0).to_string(), "cpu_pinned:0");
    }

    #[test]
    fn test_host_buffer_read_write() {
        let buf = HostBuffer::new(8);
        buf.write(2, &[1, 2, 3]).unwrap();
        let mut out = [0u8; 4];
        buf.read(1, &mut out).unwrap();
        assert_eq!(out, [0, 1, 2, 3]);
        assert_eq!(buf.to_vec().unwrap(), vec![0, 0, 1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn test_host_buffer_bounds() {
        let buf = HostBuffer::pinned(4, 0);
        assert_eq!(buf.location(), MemoryLocation::pinned(0));
        assert!(matches!(
            buf.write(2, &[0u8; 3]),
            Err(DeviceError::OutOfBounds { buffer_len: 4, .. })
        ));
        assert!(buf.ipc_handle().is_none());
    }

    #[test]
    fn test_ipc_handle_debug_is_short() {
        let mut raw = [0u8; 64];
        raw[0] = 0xab;
        let debug = format!("{:?}", IpcMemHandle(raw));
        assert!(debug.starts_with("IpcMemHandle(ab"));
        assert!(!IpcMemHandle(raw).is_zeroed());
    }
}
