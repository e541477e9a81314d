// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Arena capacity, with human-readable parsing for configs and the CLI.

use crate::ArenaError;
use std::fmt;
use std::str::FromStr;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Binary-unit suffixes, longest first so `"MB"` wins over `"B"`.
const SUFFIXES: [(&str, usize); 7] = [
    ("GB", GIB),
    ("MB", MIB),
    ("KB", KIB),
    ("G", GIB),
    ("M", MIB),
    ("K", KIB),
    ("B", 1),
];

/// The fixed capacity of a shared-memory arena, in bytes.
///
/// Parses `"64M"`, `"64MB"`, `"1G"`, `"512K"`, `"4096B"` or a bare byte
/// count. Suffixes are binary (1K = 1024 bytes) and case-insensitive.
///
/// ```
/// use shm_arena::MemoryBudget;
///
/// let b: MemoryBudget = "64M".parse().unwrap();
/// assert_eq!(b.as_bytes(), 64 * 1024 * 1024);
/// assert_eq!(b.to_string(), "64 MB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn from_kb(kb: usize) -> Self {
        Self::from_bytes(kb * KIB)
    }

    pub fn from_mb(mb: usize) -> Self {
        Self::from_bytes(mb * MIB)
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Whole mebibytes, truncated.
    pub fn as_mb(&self) -> usize {
        self.bytes / MIB
    }

    pub fn parse(s: &str) -> Result<Self, ArenaError> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        let (digits, multiplier) = SUFFIXES
            .iter()
            .find_map(|&(suffix, mult)| upper.strip_suffix(suffix).map(|rest| (rest, mult)))
            .unwrap_or((upper.as_str(), 1));

        let value: usize = digits.trim().parse().map_err(|_| {
            ArenaError::InvalidBudget(format!("'{trimmed}': expected a byte count with an optional K, M or G suffix"))
        })?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| ArenaError::InvalidBudget(format!("'{trimmed}' overflows")))?;
        if bytes == 0 {
            return Err(ArenaError::InvalidBudget(format!("'{trimmed}' is an empty arena")));
        }
        Ok(Self { bytes })
    }
}

impl FromStr for MemoryBudget {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MemoryBudget {
    /// Largest unit that divides the capacity exactly.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (unit, label) = [(GIB, "GB"), (MIB, "MB"), (KIB, "KB")]
            .into_iter()
            .find(|&(unit, _)| self.bytes >= unit && self.bytes % unit == 0)
            .unwrap_or((1, "B"));
        write!(f, "{} {label}", self.bytes / unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes() {
        assert_eq!(MemoryBudget::parse("64M").unwrap(), MemoryBudget::from_mb(64));
        assert_eq!(MemoryBudget::parse("64mb").unwrap(), MemoryBudget::from_mb(64));
        assert_eq!(MemoryBudget::parse("1G").unwrap().as_mb(), 1024);
        assert_eq!(MemoryBudget::parse("4K").unwrap(), MemoryBudget::from_kb(4));
        assert_eq!(MemoryBudget::parse("4096B").unwrap().as_bytes(), 4096);
        assert_eq!(MemoryBudget::parse("8192").unwrap().as_bytes(), 8192);
    }

    #[test]
    fn test_surrounding_whitespace() {
        assert_eq!(" 16 M ".parse::<MemoryBudget>().unwrap().as_mb(), 16);
    }

    #[test]
    fn test_rejects_bad_budgets() {
        for bad in ["", "M", "lots", "-1M", "0", "0K"] {
            assert!(
                matches!(MemoryBudget::parse(bad), Err(ArenaError::InvalidBudget(_))),
                "accepted '{bad}'"
            );
        }
        assert!(MemoryBudget::parse(&format!("{}G", usize::MAX)).is_err());
    }

    #[test]
    fn test_display_uses_exact_unit() {
        assert_eq!(MemoryBudget::from_mb(2048).to_string(), "2 GB");
        assert_eq!(MemoryBudget::from_mb(64).to_string(), "64 MB");
        assert_eq!(MemoryBudget::from_bytes(6 * 1024).to_string(), "6 KB");
        assert_eq!(MemoryBudget::from_bytes(1500).to_string(), "1500 B");
    }

    #[test]
    fn test_serde_is_a_byte_count() {
        let json = serde_json::to_string(&MemoryBudget::from_kb(1)).unwrap();
        assert_eq!(json, "1024");
        let back: MemoryBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MemoryBudget::from_kb(1));
    }
}
