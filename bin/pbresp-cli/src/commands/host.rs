// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! An in-process host channel that keeps everything it is sent.

use infer_response::{BufferAttributes, GrantedBuffer, HostChannel, HostError, ResponseFlags};
use std::sync::{Arc, Mutex, MutexGuard};
use tensor_core::{DType, DeviceBuffer, HostBuffer, MemoryBuffer, MemoryLocation, Shape};

/// Venue the loopback host grants for output buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Placement {
    /// Whatever the pipeline asks for.
    AsRequested,
    Host,
    Pinned,
    /// Device 0.
    Device,
}

impl Placement {
    fn grant(self, preferred: MemoryLocation) -> MemoryLocation {
        match self {
            Placement::AsRequested => preferred,
            Placement::Host => MemoryLocation::CPU,
            Placement::Pinned => MemoryLocation::pinned(0),
            Placement::Device => MemoryLocation::gpu(0),
        }
    }
}

#[derive(Debug)]
pub struct LoopbackOutput {
    name: String,
    dtype: DType,
    shape: Shape,
    buffer: Option<Arc<dyn MemoryBuffer>>,
}

pub type OutputSlot = Arc<Mutex<LoopbackOutput>>;

#[derive(Debug)]
pub struct LoopbackResponse {
    request: u64,
    outputs: Vec<OutputSlot>,
}

/// One output as it stood when its response was sent.
#[derive(Debug, Clone)]
pub struct DeliveredOutput {
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
    pub location: MemoryLocation,
    pub byte_size: usize,
    /// The buffer contents at send time; `None` if it could not be read.
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct DeliveredResponse {
    pub request: u64,
    pub flags: ResponseFlags,
    pub error: Option<HostError>,
    pub outputs: Vec<DeliveredOutput>,
}

#[derive(Debug)]
pub struct LoopbackHost {
    placement: Placement,
    delivered: Mutex<Vec<DeliveredResponse>>,
    released: Mutex<Vec<u64>>,
}

impl LoopbackHost {
    pub fn new(placement: Placement) -> Self {
        Self {
            placement,
            delivered: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<DeliveredResponse> {
        lock(&self.delivered).clone()
    }

    pub fn released(&self) -> Vec<u64> {
        lock(&self.released).clone()
    }
}

// Poisoning leaves the recorded data intact.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HostChannel for LoopbackHost {
    type Factory = u64;
    type Response = LoopbackResponse;
    type Output = OutputSlot;

    fn create_response(&self, factory: &u64) -> Result<LoopbackResponse, HostError> {
        Ok(LoopbackResponse {
            request: *factory,
            outputs: Vec::new(),
        })
    }

    fn declare_output(
        &self,
        response: &mut LoopbackResponse,
        name: &str,
        dtype: DType,
        shape: &Shape,
    ) -> Result<OutputSlot, HostError> {
        let slot = Arc::new(Mutex::new(LoopbackOutput {
            name: name.to_string(),
            dtype,
            shape: shape.clone(),
            buffer: None,
        }));
        response.outputs.push(Arc::clone(&slot));
        Ok(slot)
    }

    fn output_buffer(
        &self,
        output: &mut OutputSlot,
        byte_size: usize,
        preferred: MemoryLocation,
    ) -> Result<GrantedBuffer, HostError> {
        let location = self.placement.grant(preferred);
        let buffer: Arc<dyn MemoryBuffer> = if location.is_device() {
            DeviceBuffer::new(location.id, byte_size)
        } else if location == MemoryLocation::CPU {
            Arc::new(HostBuffer::new(byte_size))
        } else {
            Arc::new(HostBuffer::pinned(byte_size, location.id))
        };
        tracing::trace!(%location, byte_size, "granted output buffer");
        lock(output).buffer = Some(Arc::clone(&buffer));
        Ok(GrantedBuffer { buffer, location })
    }

    fn buffer_attributes(&self, output: &OutputSlot) -> Result<BufferAttributes, HostError> {
        let declared = lock(output);
        let buffer = declared
            .buffer
            .as_ref()
            .ok_or_else(|| HostError::internal(format!("no buffer requested for '{}'", declared.name)))?;
        Ok(BufferAttributes {
            location: buffer.location(),
            byte_size: buffer.len(),
            ipc_handle: buffer.ipc_handle(),
        })
    }

    fn send(
        &self,
        response: LoopbackResponse,
        flags: ResponseFlags,
        error: Option<HostError>,
    ) -> Result<(), HostError> {
        let outputs = response
            .outputs
            .iter()
            .map(|slot| {
                let declared = lock(slot);
                let (location, byte_size, data) = match &declared.buffer {
                    Some(buffer) => (buffer.location(), buffer.len(), buffer.to_vec().ok()),
                    None => (MemoryLocation::CPU, 0, None),
                };
                DeliveredOutput {
                    name: declared.name.clone(),
                    dtype: declared.dtype,
                    shape: declared.shape.clone(),
                    location,
                    byte_size,
                    data,
                }
            })
            .collect();
        tracing::debug!(request = response.request, flags = flags.bits(), "response received");
        lock(&self.delivered).push(DeliveredResponse {
            request: response.request,
            flags,
            error,
            outputs,
        });
        Ok(())
    }

    fn release_factory(&self, factory: u64) {
        lock(&self.released).push(factory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infer_response::{Response, ResponseTarget};
    use shm_arena::{MemoryBudget, ShmArena};
    use tensor_core::{SimulatedStream, Tensor};

    #[test]
    fn test_placement_grants() {
        let gpu = MemoryLocation::gpu(1);
        assert_eq!(Placement::AsRequested.grant(gpu), gpu);
        assert_eq!(Placement::Host.grant(gpu), MemoryLocation::CPU);
        assert_eq!(Placement::Device.grant(MemoryLocation::CPU), MemoryLocation::gpu(0));
    }

    #[test]
    fn test_loopback_keeps_delivered_bytes() {
        let arena = ShmArena::anonymous(MemoryBudget::from_mb(1)).unwrap();
        let stream = SimulatedStream::new();
        let host = Arc::new(LoopbackHost::new(Placement::Device));
        let tensor = Tensor::from_f32("logits", Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
        let mut response = Response::from_outputs(vec![Arc::new(tensor)]);

        let outcome = response.send(&host, ResponseTarget::Factory(9), ResponseFlags::FINAL, &stream, &arena);
        assert!(outcome.is_ok());

        let delivered = host.delivered();
        assert_eq!(delivered.len(), 1);
        let output = &delivered[0].outputs[0];
        assert_eq!(output.location, MemoryLocation::gpu(0));
        let floats: Vec<f32> = output
            .data
            .as_ref()
            .unwrap()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(floats, vec![1.0, 2.0, 3.0]);
        assert_eq!(host.released(), vec![9]);
    }
}
