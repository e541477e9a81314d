// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Delivering a response to the serving host.
//!
//! Per output, the pipeline declares it on the host, takes the granted
//! venue, and then:
//!
//! | source | granted       | action                                         |
//! |--------|---------------|------------------------------------------------|
//! | host   | host / device | copy now; device copies go through the stream  |
//! | device | device + IPC  | [`TransferKind::Reference`] descriptor          |
//! | device | device, no IPC| [`TransferKind::Copy`] descriptor, send deferred|
//! | device | host          | [`TransferKind::Placeholder`] descriptor        |
//!
//! The stream is synchronised once, after the loop, if any copy used it.
//! Placeholder descriptors are filled by whoever owns the device data; the
//! pipeline does not track that fill.

use crate::{
    DeliveryMetrics, HostChannel, HostError, OutputBuffer, OutputTransfer, Response,
    ResponseFlags, ResponsePayload, ResponseTarget, SendGuard,
};
use shm_arena::ShmArena;
use std::sync::Arc;
use std::time::Instant;
use tensor_core::{copy_buffer, DeviceStream, Tensor};

/// What one [`Response::send`] call did.
#[derive(Debug, Default)]
pub struct SendOutcome {
    /// The first error met while talking to the host, if any. It was also
    /// sent to the host as the response's error.
    pub error: Option<HostError>,
    /// Whether the send was moved into the response's deferred callback.
    pub requires_deferred_callback: bool,
    /// Device outputs awaiting a fill, in output order.
    pub output_buffers: Vec<OutputBuffer>,
    pub metrics: DeliveryMetrics,
}

impl SendOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl Response {
    /// Delivers the response through `host`.
    ///
    /// With [`ResponseTarget::Factory`] a response handle is created here,
    /// and the factory is released after a [`ResponseFlags::FINAL`] send.
    /// Transfer descriptors for device outputs are recorded in `arena`.
    ///
    /// The host-visible send happens before this returns, unless some
    /// output took the deferred-copy branch; then it happens on
    /// [`deferred_send_callback`](Response::deferred_send_callback) (or
    /// when the response is dropped).
    pub fn send<H>(
        &mut self,
        host: &Arc<H>,
        target: ResponseTarget<H>,
        flags: ResponseFlags,
        stream: &dyn DeviceStream,
        arena: &ShmArena,
    ) -> SendOutcome
    where
        H: HostChannel + Send + Sync + 'static,
        H::Response: Send + 'static,
        H::Factory: Send + 'static,
    {
        let start = Instant::now();
        let mut outcome = SendOutcome::default();

        let (response, factory) = match target {
            ResponseTarget::Existing(response) => (response, None),
            ResponseTarget::Factory(factory) => match host.create_response(&factory) {
                Ok(response) => (response, Some(factory)),
                Err(e) => {
                    tracing::error!(error = %e, "failed to create a response");
                    if flags.is_final() {
                        host.release_factory(factory);
                    }
                    outcome.error = Some(e);
                    return outcome;
                }
            },
        };

        let mut guard = SendGuard::new(Arc::clone(host), response, flags, factory);

        let result = match &self.payload {
            ResponsePayload::Failure(error) => Err(HostError::internal(error.message())),
            ResponsePayload::Outputs(outputs) => match guard.response_mut() {
                Some(response) => deliver_outputs(host.as_ref(), response, outputs, stream, arena, &mut outcome),
                None => Ok(()),
            },
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "response carries an error");
            guard.set_error(e.clone());
            outcome.error = Some(e);
        }

        outcome.metrics.duration = start.elapsed();
        tracing::debug!("{}", outcome.metrics.summary());

        if outcome.requires_deferred_callback {
            self.deferred = Some(guard.defer());
        } else {
            // Failures are logged by the guard.
            let _ = guard.fire();
        }
        outcome
    }
}

fn deliver_outputs<H: HostChannel>(
    host: &H,
    response: &mut H::Response,
    outputs: &[Arc<Tensor>],
    stream: &dyn DeviceStream,
    arena: &ShmArena,
    outcome: &mut SendOutcome,
) -> Result<(), HostError> {
    let mut device_copy = false;
    let delivered = deliver_each(host, response, outputs, stream, arena, outcome, &mut device_copy);

    // Copies already queued must land even when a later output failed.
    if device_copy {
        let synced = stream
            .synchronize()
            .map_err(|e| HostError::internal(e.to_string()));
        outcome.metrics.stream_synchronized = synced.is_ok();
        return delivered.and(synced);
    }
    delivered
}

fn deliver_each<H: HostChannel>(
    host: &H,
    response: &mut H::Response,
    outputs: &[Arc<Tensor>],
    stream: &dyn DeviceStream,
    arena: &ShmArena,
    outcome: &mut SendOutcome,
    device_copy: &mut bool,
) -> Result<(), HostError> {
    for tensor in outputs {
        let source = tensor.memory_location();
        let byte_size = tensor.byte_size();

        let mut output = host.declare_output(response, tensor.name(), tensor.dtype(), tensor.shape())?;
        let granted = host.output_buffer(&mut output, byte_size, source)?;
        let attributes = host.buffer_attributes(&output)?;
        outcome.metrics.outputs += 1;

        tracing::debug!(
            output = tensor.name(),
            bytes = byte_size,
            %source,
            granted = %granted.location,
            "declared output"
        );

        if source.is_device() {
            let transfer = if granted.location.is_device() {
                match attributes.ipc_handle {
                    Some(ipc_handle) => OutputTransfer::reference(granted.location, byte_size, ipc_handle),
                    None => {
                        outcome.requires_deferred_callback = true;
                        OutputTransfer::copy(granted.location, byte_size)
                    }
                }
            } else {
                OutputTransfer::placeholder(granted.location, byte_size)
            };

            let shm_handle = transfer
                .save_to_shm(arena)
                .map_err(|e| HostError::internal(format!("Failed to create the output buffer: {e}")))?;
            outcome.metrics.record_transfer(transfer.kind());
            outcome.output_buffers.push(OutputBuffer {
                name: tensor.name().to_string(),
                transfer,
                shm_handle,
                destination: granted.buffer,
            });
        } else {
            let data = tensor.host_data().ok_or_else(|| {
                HostError::internal(format!("output '{}' has no host data", tensor.name()))
            })?;
            let used_stream = copy_buffer(
                "Failed to copy the output tensor to buffer.",
                source,
                data,
                granted.buffer.as_ref(),
                stream,
            )
            .map_err(|e| HostError::internal(e.to_string()))?;
            outcome.metrics.record_copy(byte_size, used_stream);
            *device_copy |= used_stream;
        }
    }
    Ok(())
}
