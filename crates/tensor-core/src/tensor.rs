// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The named tensor value object carried by inference responses.

use crate::{
    open_ipc_handle, DType, IpcMemHandle, MemoryBuffer, MemoryLocation, MemoryType, Shape, TensorError,
};
use std::sync::Arc;

/// Where a tensor's bytes are.
#[derive(Debug, Clone)]
pub(crate) enum Storage {
    /// Owned bytes in host memory.
    Host(Vec<u8>),
    /// A device (or opened peer) allocation.
    Device(Arc<dyn MemoryBuffer>),
    /// A peer device allocation known only by its IPC handle, not yet opened.
    DeviceHandle(IpcMemHandle),
}

/// A named, n-dimensional tensor.
///
/// `Tensor` is an output of one model invocation step. Host tensors own
/// their bytes; device tensors reference a device allocation, possibly one
/// owned by another process and known here only by its IPC handle.
///
/// # Memory Layout
/// Data is row-major (C order) with no padding, so
/// `byte_size == shape.num_elements() * dtype.size_bytes()`.
#[derive(Debug, Clone)]
pub struct Tensor {
    name: String,
    shape: Shape,
    dtype: DType,
    location: MemoryLocation,
    byte_size: usize,
    storage: Storage,
}

impl Tensor {
    /// Creates a host tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape, DType};
    /// let t = Tensor::zeros("scores", Shape::matrix(2, 3), DType::F32);
    /// assert_eq!(t.byte_size(), 24); // 2 * 3 * 4 bytes
    /// ```
    pub fn zeros(name: impl Into<String>, shape: Shape, dtype: DType) -> Self {
        let size = shape.size_bytes(dtype);
        Self {
            name: name.into(),
            shape,
            dtype,
            location: MemoryLocation::CPU,
            byte_size: size,
            storage: Storage::Host(vec![0u8; size]),
        }
    }

    /// Creates a host tensor from raw bytes.
    ///
    /// Returns an error if the buffer size does not match `shape.size_bytes(dtype)`.
    pub fn from_bytes(
        name: impl Into<String>,
        shape: Shape,
        dtype: DType,
        data: Vec<u8>,
    ) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            shape,
            dtype,
            location: MemoryLocation::CPU,
            byte_size: expected,
            storage: Storage::Host(data),
        })
    }

    /// Creates a host tensor from `f32` values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape};
    /// let t = Tensor::from_f32("logits", Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    /// ```
    pub fn from_f32(name: impl Into<String>, shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        let expected_elements = shape.num_elements();
        if values.len() != expected_elements {
            return Err(TensorError::BufferSizeMismatch {
                expected: expected_elements * DType::F32.size_bytes(),
                actual: values.len() * DType::F32.size_bytes(),
            });
        }
        let data = bytemuck::cast_slice::<f32, u8>(values).to_vec();
        Self::from_bytes(name, shape, DType::F32, data)
    }

    /// Creates a tensor over a device allocation.
    ///
    /// The buffer must live in device memory and be at least as large as
    /// the tensor.
    pub fn from_device(
        name: impl Into<String>,
        shape: Shape,
        dtype: DType,
        buffer: Arc<dyn MemoryBuffer>,
    ) -> Result<Self, TensorError> {
        let name = name.into();
        let location = buffer.location();
        if !location.is_device() {
            return Err(TensorError::WrongResidency {
                name,
                detail: format!("buffer is in {location}, expected device memory"),
            });
        }
        let expected = shape.size_bytes(dtype);
        if buffer.len() < expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: buffer.len(),
            });
        }
        Ok(Self {
            name,
            shape,
            dtype,
            location,
            byte_size: expected,
            storage: Storage::Device(buffer),
        })
    }

    /// Reassembles a tensor from decoded parts.
    pub(crate) fn from_parts(
        name: String,
        shape: Shape,
        dtype: DType,
        location: MemoryLocation,
        storage: Storage,
    ) -> Self {
        let byte_size = shape.size_bytes(dtype);
        Self {
            name,
            shape,
            dtype,
            location,
            byte_size,
            storage,
        }
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Returns the tensor's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the size of the tensor's data in bytes.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Returns the venue the tensor's data lives in.
    pub fn memory_location(&self) -> MemoryLocation {
        self.location
    }

    pub fn memory_type(&self) -> MemoryType {
        self.location.kind
    }

    pub fn memory_type_id(&self) -> i64 {
        self.location.id
    }

    /// Returns `true` if the data lives in device memory.
    pub fn is_device_resident(&self) -> bool {
        self.location.is_device()
    }

    /// Returns the host bytes, or `None` for a device tensor.
    pub fn host_data(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Host(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the device allocation, if it is mapped in this process.
    pub fn device_buffer(&self) -> Option<&Arc<dyn MemoryBuffer>> {
        match &self.storage {
            Storage::Device(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Returns the IPC handle of the device allocation, if it has one.
    pub fn ipc_handle(&self) -> Option<IpcMemHandle> {
        match &self.storage {
            Storage::Host(_) => None,
            Storage::Device(buffer) => buffer.ipc_handle(),
            Storage::DeviceHandle(handle) => Some(*handle),
        }
    }

    /// Maps a device allocation known only by IPC handle. A no-op for
    /// tensors whose data is already accessible.
    pub fn open_device_handle(&mut self) -> Result<(), TensorError> {
        if let Storage::DeviceHandle(handle) = &self.storage {
            let buffer = open_ipc_handle(handle)?;
            self.storage = Storage::Device(buffer);
        }
        Ok(())
    }

    /// Copies the tensor's data into a host `Vec`.
    pub fn to_host_bytes(&self) -> Result<Vec<u8>, TensorError> {
        match &self.storage {
            Storage::Host(data) => Ok(data.clone()),
            Storage::Device(buffer) => {
                let mut out = vec![0u8; self.byte_size];
                buffer.read(0, &mut out)?;
                Ok(out)
            }
            Storage::DeviceHandle(_) => Err(TensorError::WrongResidency {
                name: self.name.clone(),
                detail: "device handle has not been opened".into(),
            }),
        }
    }

    /// Decodes host `f32` data. Returns `None` for other dtypes or device tensors.
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        if self.dtype != DType::F32 {
            return None;
        }
        let data = self.host_data()?;
        Some(
            data.chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceBuffer, HostBuffer};

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros("out", Shape::matrix(2, 3), DType::F32);
        assert_eq!(t.name(), "out");
        assert_eq!(t.byte_size(), 24);
        assert_eq!(t.shape(), &Shape::matrix(2, 3));
        assert_eq!(t.memory_location(), MemoryLocation::CPU);
        assert!(t.to_f32_vec().unwrap().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_from_f32() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let t = Tensor::from_f32("logits", Shape::matrix(2, 3), &data).unwrap();
        assert_eq!(t.to_f32_vec().unwrap(), data);
        assert_eq!(t.dtype(), DType::F32);
    }

    #[test]
    fn test_from_bytes_size_mismatch() {
        let result = Tensor::from_bytes("x", Shape::matrix(2, 3), DType::F32, vec![0u8; 10]);
        assert!(matches!(
            result,
            Err(TensorError::BufferSizeMismatch { expected: 24, actual: 10 })
        ));
    }

    #[test]
    fn test_from_device() {
        let buffer = DeviceBuffer::from_bytes(1, &[1, 0, 0, 0, 2, 0, 0, 0]);
        let t = Tensor::from_device("ids", Shape::vector(2), DType::I32, buffer).unwrap();
        assert!(t.is_device_resident());
        assert_eq!(t.memory_type_id(), 1);
        assert!(t.host_data().is_none());
        assert!(t.ipc_handle().is_some());
        assert_eq!(t.to_host_bytes().unwrap(), vec![1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_from_device_rejects_host_buffer() {
        let buffer = Arc::new(HostBuffer::new(8));
        let result = Tensor::from_device("ids", Shape::vector(2), DType::I32, buffer);
        assert!(matches!(result, Err(TensorError::WrongResidency { .. })));
    }

    #[test]
    fn test_from_device_rejects_small_buffer() {
        let buffer = DeviceBuffer::new(0, 4);
        let result = Tensor::from_device("ids", Shape::vector(2), DType::I32, buffer);
        assert!(matches!(result, Err(TensorError::BufferSizeMismatch { .. })));
    }

    #[test]
    fn test_to_f32_vec_wrong_dtype() {
        let t = Tensor::zeros("mask", Shape::vector(4), DType::Bool);
        assert!(t.to_f32_vec().is_none());
    }
}
