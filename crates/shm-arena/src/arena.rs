// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bump-allocated shared-memory arena addressed by handle.
//!
//! The [`ShmArena`] is the allocator every shared-memory record is built in.
//! It:
//!
//! 1. Maps a fixed-capacity region, either anonymous (one process, tests) or
//!    backed by a file such as `/dev/shm/<name>` (several processes).
//! 2. Hands out regions by advancing an allocation cursor stored *inside*
//!    the mapping with an atomic compare-and-swap, so processes sharing the
//!    file never hand out overlapping regions.
//! 3. Resolves [`ShmHandle`]s back to regions after bounds and magic checks.
//!
//! # Mapping Layout
//! ```text
//! 0                64               64+16
//! ┌────────────────┬────────────────┬───────────────┬─────────
//! │ ArenaHeader    │ RegionHeader   │ payload ...   │ next region
//! │ magic, version │ magic, len     │ (len bytes)   │ (16-aligned)
//! │ capacity, cur  │                │               │
//! └────────────────┴────────────────┴───────────────┴─────────
//! ```
//!
//! Regions are never freed or moved. A region stays valid for as long as any
//! process keeps the arena mapped.

use crate::region::{RegionHeader, ShmRegion};
use crate::{AllocationStats, ArenaError, MemoryBudget, ShmHandle};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identifies a mapping as a response arena.
const ARENA_MAGIC: [u8; 8] = *b"PBSHMARN";

/// Bumped whenever the header or region layout changes.
const LAYOUT_VERSION: u32 = 1;

/// Size of the mapping header. The first region starts right after it.
pub const ARENA_HEADER_SIZE: usize = 64;

/// Every region (header included) starts on this boundary.
pub const REGION_ALIGN: usize = 16;

/// Byte offset of the allocation cursor inside the arena header.
const CURSOR_OFFSET: usize = 24;

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct ArenaHeader {
    magic: [u8; 8],
    version: u32,
    _reserved: u32,
    capacity: u64,
    /// Accessed only through [`ArenaInner::cursor`] once the arena is live.
    cursor: u64,
    _pad: [u8; 32],
}

const _: () = assert!(std::mem::size_of::<ArenaHeader>() == ARENA_HEADER_SIZE);

/// Mapping state shared between the arena and every region view via `Arc`.
pub(crate) struct ArenaInner {
    /// Keeps the mapping alive; all access goes through `base`.
    _mmap: MmapMut,
    base: *mut u8,
    capacity: usize,
    path: Option<PathBuf>,
    stats: Mutex<AllocationStats>,
}

// The mapping is shared memory: concurrent access is the arena's contract
// with its users, not something Rust's aliasing rules can see. All accesses
// are bounds-checked copies through `base`.
unsafe impl Send for ArenaInner {}
unsafe impl Sync for ArenaInner {}

impl ArenaInner {
    fn cursor(&self) -> &AtomicU64 {
        // SAFETY: the header lives at the start of a page-aligned mapping,
        // so CURSOR_OFFSET is 8-byte aligned and in bounds for the lifetime
        // of `self`.
        unsafe { &*(self.base.add(CURSOR_OFFSET) as *const AtomicU64) }
    }

    /// Copies `out.len()` bytes starting at mapping offset `offset`.
    pub(crate) fn read_raw(&self, offset: usize, out: &mut [u8]) {
        debug_assert!(offset + out.len() <= self.capacity);
        // SAFETY: callers check bounds against the region, which lies inside
        // the mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(offset), out.as_mut_ptr(), out.len());
        }
    }

    /// Copies `data` into the mapping at offset `offset`.
    pub(crate) fn write_raw(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.capacity);
        // SAFETY: as for `read_raw`.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(offset), data.len());
        }
    }

    fn fill_zero(&self, offset: usize, len: usize) {
        debug_assert!(offset + len <= self.capacity);
        // SAFETY: as for `read_raw`.
        unsafe { std::ptr::write_bytes(self.base.add(offset), 0, len) }
    }

    fn with_stats(&self, f: impl FnOnce(&mut AllocationStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

/// A fixed-capacity shared-memory arena.
///
/// Cloning is cheap and yields another view of the same mapping.
///
/// # Example
/// ```
/// use shm_arena::{MemoryBudget, ShmArena};
///
/// let arena = ShmArena::anonymous(MemoryBudget::from_mb(1)).unwrap();
/// let region = arena.construct(16).unwrap();
/// region.write_bytes(0, b"hello").unwrap();
///
/// // Any holder of the handle can resolve it again.
/// let again = arena.load(region.handle()).unwrap();
/// assert_eq!(again.read_bytes(0, 5).unwrap(), b"hello");
/// ```
#[derive(Clone)]
pub struct ShmArena {
    inner: Arc<ArenaInner>,
}

impl ShmArena {
    /// Creates an anonymous arena visible only to this process.
    pub fn anonymous(budget: MemoryBudget) -> Result<Self, ArenaError> {
        let capacity = checked_capacity(budget)?;
        let mmap = MmapMut::map_anon(capacity)?;
        let arena = Self::from_mmap(mmap, capacity, None);
        arena.write_header();
        tracing::debug!("anonymous arena created: {budget}");
        Ok(arena)
    }

    /// Creates (or truncates) a file-backed arena at `path`.
    ///
    /// Other processes attach to it with [`ShmArena::open`].
    pub fn create(path: &Path, budget: MemoryBudget) -> Result<Self, ArenaError> {
        let capacity = checked_capacity(budget)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity as u64)?;
        // SAFETY: the file was just created and sized by us; other processes
        // only ever touch it through another `ShmArena`.
        let mmap = unsafe { MmapMut::map_mut(&file) }?;
        let arena = Self::from_mmap(mmap, capacity, Some(path.to_path_buf()));
        arena.write_header();
        tracing::info!("arena created at '{}': {budget}", path.display());
        Ok(arena)
    }

    /// Attaches to an existing file-backed arena.
    pub fn open(path: &Path) -> Result<Self, ArenaError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len() as usize;
        if file_len < ARENA_HEADER_SIZE {
            return Err(ArenaError::CorruptArena(format!(
                "'{}' is {file_len} bytes, smaller than the arena header",
                path.display()
            )));
        }
        // SAFETY: see `create`.
        let mmap = unsafe { MmapMut::map_mut(&file) }?;
        let arena = Self::from_mmap(mmap, file_len, Some(path.to_path_buf()));
        arena.check_header()?;
        tracing::info!(
            "arena opened at '{}': {} of {} bytes used",
            path.display(),
            arena.used_bytes(),
            arena.capacity(),
        );
        Ok(arena)
    }

    fn from_mmap(mut mmap: MmapMut, capacity: usize, path: Option<PathBuf>) -> Self {
        let base = mmap.as_mut_ptr();
        Self {
            inner: Arc::new(ArenaInner {
                _mmap: mmap,
                base,
                capacity,
                path,
                stats: Mutex::new(AllocationStats::default()),
            }),
        }
    }

    fn write_header(&self) {
        let header = ArenaHeader {
            magic: ARENA_MAGIC,
            version: LAYOUT_VERSION,
            _reserved: 0,
            capacity: self.inner.capacity as u64,
            cursor: ARENA_HEADER_SIZE as u64,
            _pad: [0; 32],
        };
        self.inner.write_raw(0, bytemuck::bytes_of(&header));
    }

    fn check_header(&self) -> Result<(), ArenaError> {
        let mut header: ArenaHeader = bytemuck::Zeroable::zeroed();
        self.inner.read_raw(0, bytemuck::bytes_of_mut(&mut header));
        if header.magic != ARENA_MAGIC {
            return Err(ArenaError::CorruptArena("arena magic mismatch".into()));
        }
        if header.version != LAYOUT_VERSION {
            return Err(ArenaError::CorruptArena(format!(
                "layout version {} (expected {LAYOUT_VERSION})",
                header.version
            )));
        }
        if header.capacity as usize != self.inner.capacity {
            return Err(ArenaError::CorruptArena(format!(
                "header capacity {} does not match mapping size {}",
                header.capacity, self.inner.capacity
            )));
        }
        let cursor = self.used_bytes();
        if cursor < ARENA_HEADER_SIZE || cursor > self.inner.capacity {
            return Err(ArenaError::CorruptArena(format!(
                "allocation cursor {cursor} out of range"
            )));
        }
        Ok(())
    }

    /// Constructs a zero-filled region with exactly `size` payload bytes.
    ///
    /// Returns `Err(OutOfMemory)` if the region does not fit.
    pub fn construct(&self, size: usize) -> Result<ShmRegion, ArenaError> {
        if size == 0 {
            return Err(ArenaError::ZeroSizedAllocation);
        }

        let capacity = self.inner.capacity;
        let Some(footprint) = RegionHeader::SIZE
            .checked_add(size)
            .and_then(|bytes| checked_align_up(bytes, REGION_ALIGN))
        else {
            self.inner.with_stats(|s| s.record_oom());
            return Err(ArenaError::OutOfMemory {
                requested_bytes: size,
                available_bytes: self.available_bytes().saturating_sub(RegionHeader::SIZE),
                capacity_bytes: capacity,
            });
        };
        let cursor = self.inner.cursor();

        let mut offset = cursor.load(Ordering::Acquire) as usize;
        loop {
            let end = match offset.checked_add(footprint) {
                Some(end) if end <= capacity => end,
                _ => {
                    self.inner.with_stats(|s| s.record_oom());
                    return Err(ArenaError::OutOfMemory {
                        requested_bytes: size,
                        available_bytes: capacity
                            .saturating_sub(offset)
                            .saturating_sub(RegionHeader::SIZE),
                        capacity_bytes: capacity,
                    });
                }
            };
            match cursor.compare_exchange_weak(
                offset as u64,
                end as u64,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => offset = actual as usize,
            }
        }

        let header = RegionHeader::new(size);
        self.inner.write_raw(offset, bytemuck::bytes_of(&header));
        self.inner.fill_zero(offset + RegionHeader::SIZE, size);

        self.inner.with_stats(|s| {
            s.record_allocation(size);
            s.update_peak(offset + footprint);
        });

        Ok(ShmRegion::new(
            Arc::clone(&self.inner),
            ShmHandle::from_raw(offset as u64),
            size,
        ))
    }

    /// Resolves a handle to the region it was constructed as.
    pub fn load(&self, handle: ShmHandle) -> Result<ShmRegion, ArenaError> {
        match self.resolve(handle) {
            Ok(len) => {
                self.inner.with_stats(|s| s.record_load());
                Ok(ShmRegion::new(Arc::clone(&self.inner), handle, len))
            }
            Err(reason) => {
                self.inner.with_stats(|s| s.record_invalid_handle());
                Err(ArenaError::InvalidHandle { handle, reason })
            }
        }
    }

    fn resolve(&self, handle: ShmHandle) -> Result<usize, String> {
        let offset = usize::try_from(handle.as_raw()).map_err(|_| "offset overflow".to_string())?;
        if offset < ARENA_HEADER_SIZE {
            return Err("points into the arena header".into());
        }
        if offset % REGION_ALIGN != 0 {
            return Err("misaligned region offset".into());
        }
        // The cursor lives in shared memory; never trust it past the mapping.
        let used = self.used_bytes().min(self.inner.capacity);
        let payload = match offset.checked_add(RegionHeader::SIZE) {
            Some(payload) if payload <= used => payload,
            _ => return Err(format!("beyond allocation cursor ({used})")),
        };

        let mut header = RegionHeader::new(0);
        self.inner.read_raw(offset, bytemuck::bytes_of_mut(&mut header));
        if !header.is_valid() {
            return Err("region magic mismatch".into());
        }
        let len = usize::try_from(header.len)
            .ok()
            .filter(|&len| len <= used - payload)
            .ok_or_else(|| format!("region length {} exceeds allocated space", header.len))?;
        Ok(len)
    }

    /// Returns the total mapping size in bytes (header included).
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the allocation cursor: bytes consumed so far by every
    /// process sharing this arena, header included.
    pub fn used_bytes(&self) -> usize {
        self.inner.cursor().load(Ordering::Acquire) as usize
    }

    /// Returns the number of bytes not yet handed out.
    pub fn available_bytes(&self) -> usize {
        self.capacity().saturating_sub(self.used_bytes())
    }

    /// Returns the backing file path, or `None` for an anonymous arena.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Returns a snapshot of this process's allocation statistics.
    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

fn checked_capacity(budget: MemoryBudget) -> Result<usize, ArenaError> {
    let capacity = budget.as_bytes();
    if capacity <= ARENA_HEADER_SIZE + RegionHeader::SIZE {
        return Err(ArenaError::InvalidBudget(format!(
            "{budget} cannot hold the arena header and a single region"
        )));
    }
    Ok(capacity)
}

fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

impl std::fmt::Debug for ShmArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmArena")
            .field("path", &self.inner.path)
            .field("capacity", &self.capacity())
            .field("used_bytes", &self.used_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(bytes: usize) -> ShmArena {
        ShmArena::anonymous(MemoryBudget::from_bytes(bytes)).unwrap()
    }

    #[test]
    fn test_construct_and_load() {
        let arena = arena(4096);
        let region = arena.construct(24).unwrap();
        assert_eq!(region.len(), 24);

        region.write_bytes(0, &[7u8; 24]).unwrap();
        let loaded = arena.load(region.handle()).unwrap();
        assert_eq!(loaded.len(), 24);
        assert_eq!(loaded.read_bytes(0, 24).unwrap(), vec![7u8; 24]);
    }

    #[test]
    fn test_first_region_follows_header() {
        let arena = arena(4096);
        let region = arena.construct(1).unwrap();
        assert_eq!(region.handle().as_raw() as usize, ARENA_HEADER_SIZE);
        // Header + 1 byte payload, rounded up to the region alignment.
        assert_eq!(arena.used_bytes(), ARENA_HEADER_SIZE + 32);
    }

    #[test]
    fn test_regions_are_zeroed() {
        let arena = arena(4096);
        let region = arena.construct(64).unwrap();
        assert!(region.read_bytes(0, 64).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_regions_do_not_overlap() {
        let arena = arena(4096);
        let a = arena.construct(10).unwrap();
        let b = arena.construct(10).unwrap();
        a.write_bytes(0, &[1u8; 10]).unwrap();
        b.write_bytes(0, &[2u8; 10]).unwrap();
        assert_eq!(a.read_bytes(0, 10).unwrap(), vec![1u8; 10]);
        assert_eq!(b.read_bytes(0, 10).unwrap(), vec![2u8; 10]);
        assert!(b.handle().as_raw() % REGION_ALIGN as u64 == 0);
    }

    #[test]
    fn test_oom() {
        let arena = arena(256);
        let _a = arena.construct(100).unwrap();
        let result = arena.construct(200);
        assert!(matches!(result, Err(ArenaError::OutOfMemory { .. })));
        assert_eq!(arena.stats().oom_count, 1);
    }

    #[test]
    fn test_failed_construct_does_not_move_cursor() {
        let arena = arena(256);
        let before = arena.used_bytes();
        assert!(arena.construct(10_000).is_err());
        assert_eq!(arena.used_bytes(), before);
    }

    #[test]
    fn test_zero_construct() {
        let arena = arena(4096);
        assert!(matches!(
            arena.construct(0),
            Err(ArenaError::ZeroSizedAllocation)
        ));
    }

    #[test]
    fn test_budget_too_small() {
        assert!(matches!(
            ShmArena::anonymous(MemoryBudget::from_bytes(64)),
            Err(ArenaError::InvalidBudget(_))
        ));
    }

    #[test]
    fn test_load_rejects_bad_handles() {
        let arena = arena(4096);
        let region = arena.construct(32).unwrap();

        for raw in [0, 8, region.handle().as_raw() + 4, 4000] {
            let result = arena.load(ShmHandle::from_raw(raw));
            assert!(
                matches!(result, Err(ArenaError::InvalidHandle { .. })),
                "handle {raw} should be rejected"
            );
        }
        assert_eq!(arena.stats().invalid_handle_count, 4);
    }

    #[test]
    fn test_construct_size_overflow() {
        let arena = arena(4096);
        for size in [usize::MAX, usize::MAX - RegionHeader::SIZE, usize::MAX - 20] {
            assert!(matches!(
                arena.construct(size),
                Err(ArenaError::OutOfMemory { .. })
            ));
        }
        assert_eq!(arena.used_bytes(), ARENA_HEADER_SIZE);
        assert_eq!(arena.stats().oom_count, 3);
    }

    #[test]
    fn test_load_rejects_huge_handle() {
        let arena = arena(4096);
        let _a = arena.construct(32).unwrap();
        for raw in [u64::MAX - 15, u64::MAX & !15] {
            assert!(matches!(
                arena.load(ShmHandle::from_raw(raw)),
                Err(ArenaError::InvalidHandle { .. })
            ));
        }
    }

    #[test]
    fn test_load_rejects_corrupt_region_length() {
        use std::io::{Seek, SeekFrom, Write};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.shm");
        let writer = ShmArena::create(&path, MemoryBudget::from_bytes(4096)).unwrap();
        let handle = writer.construct(32).unwrap().handle();
        drop(writer);

        // The length field follows the magic and reserved words.
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(handle.as_raw() + 8)).unwrap();
        file.write_all(&(u64::MAX - 20).to_ne_bytes()).unwrap();
        file.sync_all().unwrap();
        drop(file);

        let reader = ShmArena::open(&path).unwrap();
        assert!(matches!(
            reader.load(handle),
            Err(ArenaError::InvalidHandle { .. })
        ));
        assert_eq!(reader.stats().invalid_handle_count, 1);
    }

    #[test]
    fn test_load_rejects_payload_offset() {
        let arena = arena(4096);
        let _a = arena.construct(64).unwrap();
        // 16 bytes into a region is aligned but lands on payload, not a header.
        let inside = ShmHandle::from_raw((ARENA_HEADER_SIZE + RegionHeader::SIZE) as u64);
        assert!(arena.load(inside).is_err());
    }

    #[test]
    fn test_clone_shares_mapping() {
        let arena = arena(4096);
        let other = arena.clone();
        let region = arena.construct(8).unwrap();
        region.write_bytes(0, b"shared!!").unwrap();
        let seen = other.load(region.handle()).unwrap();
        assert_eq!(seen.read_bytes(0, 8).unwrap(), b"shared!!");
        assert_eq!(other.used_bytes(), arena.used_bytes());
    }

    #[test]
    fn test_region_outlives_arena_handle() {
        let arena = arena(4096);
        let region = arena.construct(4).unwrap();
        drop(arena);
        region.write_bytes(0, b"live").unwrap();
        assert_eq!(region.read_bytes(0, 4).unwrap(), b"live");
    }

    #[test]
    fn test_file_backed_create_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.shm");

        let writer = ShmArena::create(&path, MemoryBudget::from_bytes(8192)).unwrap();
        let region = writer.construct(5).unwrap();
        region.write_bytes(0, b"cross").unwrap();

        let reader = ShmArena::open(&path).unwrap();
        assert_eq!(reader.capacity(), 8192);
        assert_eq!(reader.used_bytes(), writer.used_bytes());
        let seen = reader.load(region.handle()).unwrap();
        assert_eq!(seen.read_bytes(0, 5).unwrap(), b"cross");

        // Allocations from either side advance the same cursor.
        let next = reader.construct(5).unwrap();
        assert!(next.handle() > region.handle());
        assert_eq!(writer.used_bytes(), reader.used_bytes());
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.shm");
        std::fs::write(&path, vec![0xABu8; 4096]).unwrap();
        assert!(matches!(
            ShmArena::open(&path),
            Err(ArenaError::CorruptArena(_))
        ));
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.shm");
        std::fs::write(&path, b"tiny").unwrap();
        assert!(matches!(
            ShmArena::open(&path),
            Err(ArenaError::CorruptArena(_))
        ));
    }

    #[test]
    fn test_concurrent_construct() {
        let arena = arena(1024 * 1024);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let arena = arena.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| arena.construct(48).unwrap().handle())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<ShmHandle> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 400);
        assert_eq!(arena.used_bytes(), ARENA_HEADER_SIZE + 400 * 64);
    }

    #[test]
    fn test_debug_format() {
        let arena = arena(4096);
        let debug = format!("{arena:?}");
        assert!(debug.contains("ShmArena"));
        assert!(debug.contains("capacity"));
    }
}
