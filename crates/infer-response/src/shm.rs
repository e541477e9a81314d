// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shared-memory encoding of [`Response`].
//!
//! A response record is one region:
//!
//! ```text
//! ┌──────────────────────── ResponseShm (24 bytes) ───────────────────────┐
//! │ has_error u8 │ is_error_set u8 │ pad │ error u64 │ outputs_size u32 │ pad │
//! └───────────────────────────────────────────────────────────────────────┘
//! outputs: outputs_size x u64 tensor handles
//! ```
//!
//! The region is exactly `24 + 8 * outputs_size` bytes. A failed response
//! has `outputs_size == 0` and `error` pointing at its message; if saving
//! the message failed, `is_error_set` stays clear and the decoder reports a
//! generic error instead.

use crate::{InferError, Response, ResponseError, ResponsePayload};
use shm_arena::{ShmArena, ShmHandle};
use std::sync::Arc;
use tensor_core::Tensor;

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct ResponseShm {
    has_error: u8,
    is_error_set: u8,
    _pad: [u8; 6],
    error: u64,
    outputs_size: u32,
    _pad2: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<ResponseShm>();
const HANDLE_SIZE: usize = std::mem::size_of::<u64>();

impl ResponseShm {
    fn new(has_error: bool, outputs_size: u32) -> Self {
        Self {
            has_error: u8::from(has_error),
            outputs_size,
            ..bytemuck::Zeroable::zeroed()
        }
    }
}

impl Response {
    /// Encodes the response into `arena` and returns its record handle,
    /// which is also kept in [`shm_handle`](Self::shm_handle).
    ///
    /// `copy_device_data` is passed to every output tensor's own save.
    pub fn save_to_shm(&mut self, arena: &ShmArena, copy_device_data: bool) -> Result<ShmHandle, ResponseError> {
        match &self.payload {
            ResponsePayload::Failure(error) => {
                let region = arena.construct(HEADER_SIZE)?;
                let mut header = ResponseShm::new(true, 0);
                region.write_pod(0, &header)?;
                self.shm_handle = Some(region.handle());

                let error_handle = error.save_to_shm(arena)?;
                header.is_error_set = 1;
                header.error = error_handle.as_raw();
                region.write_pod(0, &header)?;

                tracing::debug!(handle = %region.handle(), "saved failed response");
                Ok(region.handle())
            }
            ResponsePayload::Outputs(outputs) => {
                let count = u32::try_from(outputs.len()).map_err(|_| {
                    ResponseError::InvalidArgument(format!("{} outputs do not fit a record", outputs.len()))
                })?;
                let region = arena.construct(HEADER_SIZE + outputs.len() * HANDLE_SIZE)?;
                region.write_pod(0, &ResponseShm::new(false, count))?;

                let handles = outputs
                    .iter()
                    .map(|t| t.save_to_shm(arena, copy_device_data).map(ShmHandle::as_raw))
                    .collect::<Result<Vec<u64>, _>>()?;
                region.write_pod_slice(HEADER_SIZE, &handles)?;
                self.shm_handle = Some(region.handle());

                tracing::debug!(handle = %region.handle(), outputs = count, "saved response");
                Ok(region.handle())
            }
        }
    }

    /// Decodes a response record written by [`save_to_shm`](Self::save_to_shm).
    ///
    /// `open_device_handle` is passed to every output tensor's own load.
    pub fn load_from_shm(
        arena: &ShmArena,
        handle: ShmHandle,
        open_device_handle: bool,
    ) -> Result<Response, ResponseError> {
        let region = arena.load(handle)?;
        if region.len() < HEADER_SIZE {
            return Err(ResponseError::InvalidLayout(format!(
                "region {handle} holds {} bytes, a response header needs {HEADER_SIZE}",
                region.len()
            )));
        }
        let header: ResponseShm = region.read_pod(0)?;

        let count = header.outputs_size as usize;
        if region.len() != HEADER_SIZE + count * HANDLE_SIZE {
            return Err(ResponseError::InvalidLayout(format!(
                "{count} outputs do not match a {} byte region",
                region.len()
            )));
        }

        let payload = if header.has_error != 0 {
            let error = if header.is_error_set != 0 {
                InferError::load_from_shm(arena, ShmHandle::from_raw(header.error))?
            } else {
                tracing::warn!(%handle, "response error was not saved");
                InferError::unretrievable()
            };
            ResponsePayload::Failure(error)
        } else {
            let outputs = region
                .read_pod_slice::<u64>(HEADER_SIZE, count)?
                .into_iter()
                .map(|raw| {
                    Tensor::load_from_shm(arena, ShmHandle::from_raw(raw), open_device_handle).map(Arc::new)
                })
                .collect::<Result<Vec<_>, _>>()?;
            ResponsePayload::Outputs(outputs)
        };

        let mut response = Response::from_payload(payload, None);
        response.shm_handle = Some(handle);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shm_arena::MemoryBudget;
    use tensor_core::{DType, Shape};

    fn arena(bytes: usize) -> ShmArena {
        ShmArena::anonymous(MemoryBudget::from_bytes(bytes)).unwrap()
    }

    fn header(arena: &ShmArena, handle: ShmHandle) -> ResponseShm {
        arena.load(handle).unwrap().read_pod(0).unwrap()
    }

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 24);
    }

    #[test]
    fn test_region_sized_exactly() {
        let arena = arena(64 * 1024);
        let outputs = (0..3)
            .map(|i| Arc::new(Tensor::zeros(format!("out{i}"), Shape::vector(4), DType::I32)))
            .collect();
        let mut r = Response::from_outputs(outputs);
        let handle = r.save_to_shm(&arena, false).unwrap();
        assert_eq!(r.shm_handle(), Some(handle));
        assert_eq!(arena.load(handle).unwrap().len(), HEADER_SIZE + 3 * HANDLE_SIZE);
        assert_eq!(header(&arena, handle).outputs_size, 3);
    }

    #[test]
    fn test_error_record_is_header_only() {
        let arena = arena(4096);
        let tensor = Arc::new(Tensor::zeros("ignored", Shape::vector(256), DType::F32));
        let mut r = Response::new(vec![Some(tensor)], Some(InferError::new("oops"))).unwrap();
        let handle = r.save_to_shm(&arena, false).unwrap();

        let h = header(&arena, handle);
        assert_eq!((h.has_error, h.is_error_set, h.outputs_size), (1, 1, 0));
        assert_eq!(arena.load(handle).unwrap().len(), HEADER_SIZE);
        // header + message; the tensor was never written
        assert_eq!(arena.stats().total_allocations, 2);
    }

    #[test]
    fn test_unsaved_error_decodes_as_generic() {
        let arena = arena(512);
        let mut r = Response::from_error(InferError::new("x".repeat(4096)));
        assert!(r.save_to_shm(&arena, false).is_err());

        let handle = r.shm_handle().unwrap();
        let h = header(&arena, handle);
        assert_eq!((h.has_error, h.is_error_set), (1, 0));

        let back = Response::load_from_shm(&arena, handle, false).unwrap();
        assert!(back.has_error());
        assert_eq!(back.error().unwrap().message(), crate::UNRETRIEVABLE_ERROR_MESSAGE);
    }

    #[test]
    fn test_failed_output_save_records_no_handle() {
        let arena = arena(1024);
        let tensor = Arc::new(Tensor::zeros("big", Shape::vector(1024), DType::F32));
        let mut r = Response::from_outputs(vec![tensor]);
        assert!(matches!(
            r.save_to_shm(&arena, false),
            Err(ResponseError::Tensor(_))
        ));
        assert!(r.shm_handle().is_none());
    }

    #[test]
    fn test_rejects_truncated_handle_array() {
        let arena = arena(4096);
        let mut r = Response::from_outputs(vec![]);
        let handle = r.save_to_shm(&arena, false).unwrap();

        let region = arena.load(handle).unwrap();
        let mut h: ResponseShm = region.read_pod(0).unwrap();
        h.outputs_size = 2;
        region.write_pod(0, &h).unwrap();

        assert!(matches!(
            Response::load_from_shm(&arena, handle, false),
            Err(ResponseError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_rejects_foreign_region() {
        let arena = arena(4096);
        let handle = shm_arena::save_string(&arena, "hi").unwrap();
        assert!(Response::load_from_shm(&arena, handle, false).is_err());
    }
}
