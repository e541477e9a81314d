// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bounds-checked views over arena regions.
//!
//! A [`ShmRegion`] is what [`ShmArena::construct`](crate::ShmArena::construct)
//! and [`ShmArena::load`](crate::ShmArena::load) return. It holds an `Arc`
//! back to the mapping, so the memory it describes cannot be unmapped while
//! the view is alive. All access is by copy: shared memory may be written by
//! another process at any time, so the view never hands out `&[u8]` into it.

use crate::arena::ArenaInner;
use crate::{ArenaError, ShmHandle};
use bytemuck::Pod;
use std::sync::Arc;

const REGION_MAGIC: u32 = 0x3147_4e52; // "RNG1"

/// The 16-byte header in front of every region payload.
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub(crate) struct RegionHeader {
    magic: u32,
    _reserved: u32,
    pub(crate) len: u64,
}

impl RegionHeader {
    pub(crate) const SIZE: usize = std::mem::size_of::<RegionHeader>();

    pub(crate) fn new(len: usize) -> Self {
        Self {
            magic: REGION_MAGIC,
            _reserved: 0,
            len: len as u64,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.magic == REGION_MAGIC
    }
}

/// A view over one region's payload.
pub struct ShmRegion {
    inner: Arc<ArenaInner>,
    handle: ShmHandle,
    /// Payload length in bytes.
    len: usize,
}

impl ShmRegion {
    pub(crate) fn new(inner: Arc<ArenaInner>, handle: ShmHandle, len: usize) -> Self {
        Self { inner, handle, len }
    }

    /// Returns the handle that resolves to this region.
    pub fn handle(&self) -> ShmHandle {
        self.handle
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the payload is empty. Constructed regions never are.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn payload_offset(&self, offset: usize, len: usize) -> Result<usize, ArenaError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => {
                Ok(self.handle.as_raw() as usize + RegionHeader::SIZE + offset)
            }
            _ => Err(ArenaError::OutOfBounds {
                handle: self.handle,
                offset,
                len,
                region_len: self.len,
            }),
        }
    }

    /// Copies `out.len()` payload bytes starting at `offset` into `out`.
    pub fn read_into(&self, offset: usize, out: &mut [u8]) -> Result<(), ArenaError> {
        let at = self.payload_offset(offset, out.len())?;
        self.inner.read_raw(at, out);
        Ok(())
    }

    /// Reads `len` payload bytes starting at `offset`.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>, ArenaError> {
        // Check before allocating: `len` often comes from a record another
        // process wrote.
        let at = self.payload_offset(offset, len)?;
        let mut out = vec![0u8; len];
        self.inner.read_raw(at, &mut out);
        Ok(out)
    }

    /// Writes `data` into the payload at `offset`.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<(), ArenaError> {
        let at = self.payload_offset(offset, data.len())?;
        self.inner.write_raw(at, data);
        Ok(())
    }

    /// Reads a plain-old-data record stored at `offset`.
    ///
    /// The payload offset need not be aligned for `T`; the record is copied out.
    pub fn read_pod<T: Pod>(&self, offset: usize) -> Result<T, ArenaError> {
        let mut value = T::zeroed();
        self.read_into(offset, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Writes a plain-old-data record at `offset`.
    pub fn write_pod<T: Pod>(&self, offset: usize, value: &T) -> Result<(), ArenaError> {
        self.write_bytes(offset, bytemuck::bytes_of(value))
    }

    /// Reads `count` consecutive records of `T` starting at `offset`.
    pub fn read_pod_slice<T: Pod>(&self, offset: usize, count: usize) -> Result<Vec<T>, ArenaError> {
        let byte_len = count.checked_mul(std::mem::size_of::<T>()).unwrap_or(usize::MAX);
        self.payload_offset(offset, byte_len)?;
        let mut values = vec![T::zeroed(); count];
        self.read_into(offset, bytemuck::cast_slice_mut::<T, u8>(values.as_mut_slice()))?;
        Ok(values)
    }

    /// Writes `values` as consecutive records starting at `offset`.
    pub fn write_pod_slice<T: Pod>(&self, offset: usize, values: &[T]) -> Result<(), ArenaError> {
        self.write_bytes(offset, bytemuck::cast_slice::<T, u8>(values))
    }
}

impl std::fmt::Debug for ShmRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("handle", &self.handle)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{ArenaError, MemoryBudget, ShmArena};

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Pair {
        a: u32,
        b: u32,
    }

    fn arena() -> ShmArena {
        ShmArena::anonymous(MemoryBudget::from_bytes(4096)).unwrap()
    }

    #[test]
    fn test_pod_roundtrip_at_unaligned_offset() {
        let arena = arena();
        let region = arena.construct(16).unwrap();
        let pair = Pair { a: 0xdead, b: 0xbeef };
        region.write_pod(3, &pair).unwrap();
        assert_eq!(region.read_pod::<Pair>(3).unwrap(), pair);
    }

    #[test]
    fn test_pod_slice() {
        let arena = arena();
        let region = arena.construct(32).unwrap();
        region.write_pod_slice(0, &[1u64, 2, 3, 4]).unwrap();
        assert_eq!(region.read_pod_slice::<u64>(8, 3).unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn test_out_of_bounds() {
        let arena = arena();
        let region = arena.construct(8).unwrap();
        assert!(matches!(
            region.write_bytes(4, &[0u8; 5]),
            Err(ArenaError::OutOfBounds { region_len: 8, .. })
        ));
        assert!(region.read_bytes(usize::MAX, 2).is_err());
        assert!(region.read_pod::<u64>(1).is_err());
    }

    #[test]
    fn test_debug_format() {
        let arena = arena();
        let region = arena.construct(8).unwrap();
        assert!(format!("{region:?}").contains("ShmRegion"));
    }
}
