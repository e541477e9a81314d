// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Opaque handles into a shared-memory arena.

use std::fmt;

/// An opaque reference to a region inside a [`ShmArena`](crate::ShmArena).
///
/// A handle is the region's byte offset from the start of the mapping, so
/// it means the same thing in every process that maps the arena, wherever
/// the mapping happens to land in that process's address space. It is
/// resolved back to memory only through [`ShmArena::load`](crate::ShmArena::load).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ShmHandle(u64);

impl ShmHandle {
    /// The null handle. Offset 0 holds the arena header, so no region ever
    /// lives there.
    pub const NULL: ShmHandle = ShmHandle(0);

    /// Wraps a raw offset, e.g. one read back out of a shared-memory record.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw offset for storing inside a shared-memory record.
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Returns `true` for [`ShmHandle::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ShmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u64> for ShmHandle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null() {
        assert!(ShmHandle::NULL.is_null());
        assert!(!ShmHandle::from_raw(64).is_null());
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(ShmHandle::from_raw(255).to_string(), "0xff");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&ShmHandle::from_raw(128)).unwrap();
        assert_eq!(json, "128");
    }
}
