// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # shm-arena
//!
//! A handle-addressed shared-memory arena for passing inference results
//! between a model-execution worker process and a serving host process.
//!
//! # Key Components
//!
//! - [`ShmArena`]: the allocator, a fixed-capacity mapping (anonymous or
//!   file-backed) with an atomic bump cursor living inside the mapping.
//! - [`ShmHandle`]: an opaque offset into the arena. Cross-process
//!   references are always handles, never pointers.
//! - [`ShmRegion`]: a bounds-checked view over one constructed region.
//! - [`MemoryBudget`]: the arena capacity with human-readable parsing
//!   (`"64M"`, `"1G"`, etc.).
//! - [`AllocationStats`]: per-process construct/load counters.
//!
//! # Ownership Model
//!
//! ```text
//! ShmArena::construct(size)
//!       │
//!       ▼
//!   ShmRegion  ◄─── (handle, len), holds Arc<ArenaInner>
//!       │
//!       │  handle() ──► stored in another record / sent to a peer
//!       ▼
//!   ShmArena::load(handle)  ──► ShmRegion (same bytes, any process)
//! ```
//!
//! Regions are never freed individually; the mapping lives until the last
//! arena or region view in the process is dropped.

mod arena;
mod budget;
mod error;
mod handle;
mod region;
mod stats;
mod string;

pub use arena::{ShmArena, ARENA_HEADER_SIZE, REGION_ALIGN};
pub use budget::MemoryBudget;
pub use error::ArenaError;
pub use handle::ShmHandle;
pub use region::ShmRegion;
pub use stats::AllocationStats;
pub use string::{load_string, save_string};
