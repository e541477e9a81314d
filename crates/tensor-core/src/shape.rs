// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Logical tensor shapes.
//!
//! In shared memory a shape is `rank` little-endian `u64` dimensions
//! following the tensor record; [`Shape::to_wire`] and [`Shape::from_wire`]
//! convert at that boundary.

use crate::DType;
use std::fmt;

/// The dimensions of a [`crate::Tensor`], outermost first.
///
/// ```
/// use tensor_core::{DType, Shape};
/// let s = Shape::matrix(1, 1000);
/// assert_eq!(s.num_elements(), 1000);
/// assert_eq!(s.size_bytes(DType::F32), 4000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Rank 0, one element.
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn vector(len: usize) -> Self {
        Self::new(vec![len])
    }

    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self::new(vec![rows, cols])
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Element count; the empty product for a scalar is 1.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn size_bytes(&self, dtype: DType) -> usize {
        self.num_elements() * dtype.size_bytes()
    }

    /// Like [`size_bytes`](Self::size_bytes), but `None` on overflow.
    pub fn checked_size_bytes(&self, dtype: DType) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(dtype.size_bytes(), |acc, &d| acc.checked_mul(d))
    }

    /// The dimensions as stored in shared memory.
    pub fn to_wire(&self) -> Vec<u64> {
        self.dims.iter().map(|&d| d as u64).collect()
    }

    /// Rebuilds a shape from stored dimensions; `None` if one does not fit
    /// a `usize` on this platform.
    pub fn from_wire(dims: &[u64]) -> Option<Self> {
        dims.iter()
            .map(|&d| usize::try_from(d).ok())
            .collect::<Option<Vec<_>>>()
            .map(Self::new)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(usize::to_string).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_has_one_element() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), 1);
        assert_eq!(s.size_bytes(DType::F64), 8);
    }

    #[test]
    fn test_zero_dimension_is_empty() {
        let s = Shape::new(vec![0, 4]);
        assert_eq!(s.num_elements(), 0);
        assert_eq!(s.checked_size_bytes(DType::I64), Some(0));
    }

    #[test]
    fn test_checked_size_bytes() {
        assert_eq!(Shape::matrix(1, 1000).checked_size_bytes(DType::F32), Some(4000));
        assert_eq!(Shape::new(vec![usize::MAX, 2]).checked_size_bytes(DType::F32), None);
    }

    #[test]
    fn test_wire_dims() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.to_wire(), vec![2u64, 3, 4]);
        assert_eq!(Shape::from_wire(&s.to_wire()), Some(s));
        assert_eq!(Shape::from_wire(&[]), Some(Shape::scalar()));
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new(vec![2, 3, 4]).to_string(), "[2, 3, 4]");
        assert_eq!(Shape::scalar().to_string(), "[]");
    }

    #[test]
    fn test_serde_is_a_plain_list() {
        let json = serde_json::to_string(&Shape::matrix(1, 8)).unwrap();
        assert_eq!(json, "[1,8]");
        let back: Shape = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Shape::matrix(1, 8));
    }
}
