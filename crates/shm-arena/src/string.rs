// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Length-prefixed UTF-8 strings stored as arena regions.

use crate::{ArenaError, ShmArena, ShmHandle};

const LENGTH_PREFIX: usize = std::mem::size_of::<u64>();

/// Stores `value` in its own region: a `u64` byte length followed by the
/// UTF-8 bytes. Empty strings are valid.
pub fn save_string(arena: &ShmArena, value: &str) -> Result<ShmHandle, ArenaError> {
    let region = arena.construct(LENGTH_PREFIX + value.len())?;
    region.write_pod(0, &(value.len() as u64))?;
    region.write_bytes(LENGTH_PREFIX, value.as_bytes())?;
    Ok(region.handle())
}

/// Loads a string previously stored with [`save_string`].
pub fn load_string(arena: &ShmArena, handle: ShmHandle) -> Result<String, ArenaError> {
    let region = arena.load(handle)?;
    let len = region.read_pod::<u64>(0)? as usize;
    let bytes = region.read_bytes(LENGTH_PREFIX, len)?;
    String::from_utf8(bytes).map_err(|_| ArenaError::InvalidUtf8 { handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBudget;

    #[test]
    fn test_string_roundtrip() {
        let arena = ShmArena::anonymous(MemoryBudget::from_bytes(4096)).unwrap();
        let handle = save_string(&arena, "logits").unwrap();
        assert_eq!(load_string(&arena, handle).unwrap(), "logits");
    }

    #[test]
    fn test_empty_string() {
        let arena = ShmArena::anonymous(MemoryBudget::from_bytes(4096)).unwrap();
        let handle = save_string(&arena, "").unwrap();
        assert_eq!(load_string(&arena, handle).unwrap(), "");
    }

    #[test]
    fn test_invalid_utf8() {
        let arena = ShmArena::anonymous(MemoryBudget::from_bytes(4096)).unwrap();
        let region = arena.construct(LENGTH_PREFIX + 2).unwrap();
        region.write_pod(0, &2u64).unwrap();
        region.write_bytes(LENGTH_PREFIX, &[0xff, 0xfe]).unwrap();
        assert!(matches!(
            load_string(&arena, region.handle()),
            Err(ArenaError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn test_corrupt_length_prefix() {
        let arena = ShmArena::anonymous(MemoryBudget::from_bytes(4096)).unwrap();
        let region = arena.construct(LENGTH_PREFIX + 2).unwrap();
        region.write_pod(0, &1000u64).unwrap();
        assert!(matches!(
            load_string(&arena, region.handle()),
            Err(ArenaError::OutOfBounds { .. })
        ));
    }
}
