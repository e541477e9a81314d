// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The serving host's response channel, as seen by the delivery pipeline.
//!
//! The host owns output allocation: the pipeline declares an output, asks
//! for a buffer in the venue the tensor lives in, and takes whatever venue
//! the host grants. [`HostChannel`] is the whole surface the pipeline uses.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use tensor_core::{DType, IpcMemHandle, MemoryBuffer, MemoryLocation, Shape};

/// Flags passed with a response send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResponseFlags(u32);

impl ResponseFlags {
    pub const NONE: ResponseFlags = ResponseFlags(0);
    /// No further responses will be sent for the request.
    pub const FINAL: ResponseFlags = ResponseFlags(1);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: ResponseFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when the flags are exactly [`ResponseFlags::FINAL`].
    pub fn is_final(self) -> bool {
        self == Self::FINAL
    }
}

impl BitOr for ResponseFlags {
    type Output = ResponseFlags;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Classification of a host-side error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    Internal,
    InvalidArgument,
    NotFound,
    Unavailable,
    Unsupported,
}

impl HostErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HostErrorKind::Internal => "internal",
            HostErrorKind::InvalidArgument => "invalid argument",
            HostErrorKind::NotFound => "not found",
            HostErrorKind::Unavailable => "unavailable",
            HostErrorKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised by, or reported to, the serving host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HostError {
    kind: HostErrorKind,
    message: String,
}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Internal, message)
    }

    pub fn kind(&self) -> HostErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A destination buffer granted by the host.
#[derive(Debug, Clone)]
pub struct GrantedBuffer {
    pub buffer: Arc<dyn MemoryBuffer>,
    /// The venue actually granted, which may differ from the one requested.
    pub location: MemoryLocation,
}

/// Metadata the host attaches to an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAttributes {
    pub location: MemoryLocation,
    pub byte_size: usize,
    /// Set when the host exported the buffer for inter-process access.
    pub ipc_handle: Option<IpcMemHandle>,
}

impl BufferAttributes {
    pub fn ipc_handle(&self) -> Option<&IpcMemHandle> {
        self.ipc_handle.as_ref()
    }
}

/// The host's response channel.
///
/// `Factory` creates response handles for one request; `Response` is one
/// response handle, consumed by [`send`](HostChannel::send); `Output` is
/// one declared output of a response.
pub trait HostChannel {
    type Factory;
    type Response;
    type Output;

    /// Creates a new response handle for the factory's request.
    fn create_response(&self, factory: &Self::Factory) -> Result<Self::Response, HostError>;

    /// Declares an output on `response`.
    fn declare_output(
        &self,
        response: &mut Self::Response,
        name: &str,
        dtype: DType,
        shape: &Shape,
    ) -> Result<Self::Output, HostError>;

    /// Requests a `byte_size` buffer for `output`, preferably at `preferred`.
    /// The host may grant a different venue.
    fn output_buffer(
        &self,
        output: &mut Self::Output,
        byte_size: usize,
        preferred: MemoryLocation,
    ) -> Result<GrantedBuffer, HostError>;

    fn buffer_attributes(&self, output: &Self::Output) -> Result<BufferAttributes, HostError>;

    /// Sends the response with `flags`, reporting `error` if set.
    fn send(
        &self,
        response: Self::Response,
        flags: ResponseFlags,
        error: Option<HostError>,
    ) -> Result<(), HostError>;

    /// Releases a factory once its request's final response has been sent.
    fn release_factory(&self, factory: Self::Factory);
}

/// Where [`Response::send`](crate::Response::send) delivers to.
pub enum ResponseTarget<H: HostChannel> {
    /// A response handle the caller already created.
    Existing(H::Response),
    /// Create a response handle from this factory. The factory is released
    /// after a final send.
    Factory(H::Factory),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert!(ResponseFlags::FINAL.is_final());
        assert!(!ResponseFlags::NONE.is_final());
        let both = ResponseFlags::FINAL | ResponseFlags::from_bits(4);
        assert!(both.contains(ResponseFlags::FINAL));
        assert!(!both.is_final());
        assert_eq!(both.bits(), 5);
    }

    #[test]
    fn test_host_error_display() {
        let e = HostError::internal("no buffer");
        assert_eq!(e.to_string(), "internal: no buffer");
        assert_eq!(e.kind(), HostErrorKind::Internal);
        assert_eq!(e.message(), "no buffer");
    }
}
