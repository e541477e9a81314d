// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Transfer descriptors for outputs that are filled after delivery returns.
//!
//! When a device-resident output cannot be copied synchronously, the
//! pipeline records an [`OutputTransfer`] in the arena and hands it back,
//! paired with the granted destination buffer, for a later fill pass.

use crate::ResponseError;
use shm_arena::{ArenaError, ShmArena, ShmHandle};
use std::fmt;
use std::sync::Arc;
use tensor_core::{IpcMemHandle, MemoryBuffer, MemoryLocation, MemoryType};

/// How the destination of a deferred output gets filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// The owner of the source data writes straight into the destination
    /// through the host-exported IPC handle.
    Reference,
    /// The destination is device memory without an IPC handle; the data is
    /// copied locally and the send waits for it.
    Copy,
    /// The host granted host memory for a device tensor; nothing is bound
    /// yet.
    Placeholder,
}

impl TransferKind {
    fn code(self) -> u32 {
        match self {
            TransferKind::Reference => 0,
            TransferKind::Copy => 1,
            TransferKind::Placeholder => 2,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(TransferKind::Reference),
            1 => Some(TransferKind::Copy),
            2 => Some(TransferKind::Placeholder),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct TransferShm {
    kind: u32,
    memory_type: u32,
    memory_type_id: i64,
    byte_size: u64,
    has_ipc_handle: u32,
    _reserved: u32,
    ipc_handle: IpcMemHandle,
}

/// Describes one output buffer awaiting a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTransfer {
    kind: TransferKind,
    location: MemoryLocation,
    byte_size: usize,
    ipc_handle: Option<IpcMemHandle>,
}

impl OutputTransfer {
    pub fn reference(location: MemoryLocation, byte_size: usize, ipc_handle: IpcMemHandle) -> Self {
        Self {
            kind: TransferKind::Reference,
            location,
            byte_size,
            ipc_handle: Some(ipc_handle),
        }
    }

    pub fn copy(location: MemoryLocation, byte_size: usize) -> Self {
        Self {
            kind: TransferKind::Copy,
            location,
            byte_size,
            ipc_handle: None,
        }
    }

    pub fn placeholder(location: MemoryLocation, byte_size: usize) -> Self {
        Self {
            kind: TransferKind::Placeholder,
            location,
            byte_size,
            ipc_handle: None,
        }
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// The granted destination venue.
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn ipc_handle(&self) -> Option<&IpcMemHandle> {
        self.ipc_handle.as_ref()
    }

    pub fn save_to_shm(&self, arena: &ShmArena) -> Result<ShmHandle, ArenaError> {
        let record = TransferShm {
            kind: self.kind.code(),
            memory_type: self.location.kind.code(),
            memory_type_id: self.location.id,
            byte_size: self.byte_size as u64,
            has_ipc_handle: u32::from(self.ipc_handle.is_some()),
            _reserved: 0,
            ipc_handle: self.ipc_handle.unwrap_or_else(bytemuck::Zeroable::zeroed),
        };
        let region = arena.construct(std::mem::size_of::<TransferShm>())?;
        region.write_pod(0, &record)?;
        Ok(region.handle())
    }

    pub fn load_from_shm(arena: &ShmArena, handle: ShmHandle) -> Result<Self, ResponseError> {
        let region = arena.load(handle)?;
        if region.len() != std::mem::size_of::<TransferShm>() {
            return Err(ResponseError::InvalidLayout(format!(
                "transfer record at {handle} is {} bytes",
                region.len()
            )));
        }
        let record: TransferShm = region.read_pod(0)?;
        let kind = TransferKind::from_code(record.kind).ok_or_else(|| {
            ResponseError::InvalidLayout(format!("unknown transfer kind {}", record.kind))
        })?;
        let memory_type = MemoryType::from_code(record.memory_type).ok_or_else(|| {
            ResponseError::InvalidLayout(format!("unknown memory type {}", record.memory_type))
        })?;
        let ipc_handle = (record.has_ipc_handle != 0).then_some(record.ipc_handle);
        if (kind == TransferKind::Reference) != ipc_handle.is_some() {
            return Err(ResponseError::InvalidLayout(format!(
                "{kind:?} transfer with ipc handle present = {}",
                ipc_handle.is_some()
            )));
        }
        Ok(Self {
            kind,
            location: MemoryLocation::new(memory_type, record.memory_type_id),
            byte_size: record.byte_size as usize,
            ipc_handle,
        })
    }
}

/// A deferred output: its transfer descriptor, where that descriptor lives
/// in the arena, and the destination buffer the host granted.
#[derive(Clone)]
pub struct OutputBuffer {
    pub name: String,
    pub transfer: OutputTransfer,
    pub shm_handle: ShmHandle,
    pub destination: Arc<dyn MemoryBuffer>,
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("name", &self.name)
            .field("transfer", &self.transfer)
            .field("shm_handle", &self.shm_handle)
            .field("destination", &self.destination.location())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shm_arena::MemoryBudget;

    fn arena() -> ShmArena {
        ShmArena::anonymous(MemoryBudget::from_bytes(4096)).unwrap()
    }

    #[test]
    fn test_reference_record() {
        let arena = arena();
        let mut raw = [0u8; 64];
        raw[3] = 42;
        let t = OutputTransfer::reference(MemoryLocation::gpu(1), 4000, IpcMemHandle(raw));
        let handle = t.save_to_shm(&arena).unwrap();
        let back = OutputTransfer::load_from_shm(&arena, handle).unwrap();
        assert_eq!(back, t);
        assert_eq!(back.ipc_handle().unwrap().0[3], 42);
    }

    #[test]
    fn test_placeholder_record() {
        let arena = arena();
        let t = OutputTransfer::placeholder(MemoryLocation::pinned(0), 16);
        let back = OutputTransfer::load_from_shm(&arena, t.save_to_shm(&arena).unwrap()).unwrap();
        assert_eq!(back.kind(), TransferKind::Placeholder);
        assert!(back.ipc_handle().is_none());
        assert_eq!(back.location(), MemoryLocation::pinned(0));
    }

    #[test]
    fn test_rejects_wrong_size_region() {
        let arena = arena();
        let handle = shm_arena::save_string(&arena, "x").unwrap();
        assert!(matches!(
            OutputTransfer::load_from_shm(&arena, handle),
            Err(ResponseError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_rejects_copy_with_handle() {
        let arena = arena();
        let t = OutputTransfer::copy(MemoryLocation::gpu(0), 8);
        let handle = t.save_to_shm(&arena).unwrap();
        let region = arena.load(handle).unwrap();
        let mut record: TransferShm = region.read_pod(0).unwrap();
        record.has_ipc_handle = 1;
        region.write_pod(0, &record).unwrap();
        assert!(OutputTransfer::load_from_shm(&arena, handle).is_err());
    }
}
