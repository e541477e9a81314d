// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The send finalizer and its deferred form.
//!
//! ```text
//! SendGuard::new ──► set_error* ──┬──► fire()    sends now
//!                                 ├──► defer()   DeferredCompletion, sends on fire()
//!                                 ├──► cancel()  hands the response back unsent
//!                                 └──► drop      sends now
//! ```
//!
//! A guard sends at most once, and a created response handle is always sent
//! unless the guard is explicitly cancelled.

use crate::{HostChannel, HostError, ResponseFlags};
use std::fmt;
use std::sync::Arc;

struct PendingSend<H: HostChannel> {
    host: Arc<H>,
    response: H::Response,
    flags: ResponseFlags,
    /// Present only when the guard's creator made the response from this
    /// factory, and so owns its release.
    factory: Option<H::Factory>,
    error: Option<HostError>,
}

impl<H: HostChannel> PendingSend<H> {
    fn send(self) -> Result<(), HostError> {
        let PendingSend {
            host,
            response,
            flags,
            factory,
            error,
        } = self;

        let result = host.send(response, flags, error);
        if let Err(e) = &result {
            tracing::error!(error = %e, "failed to send the response");
        }
        if flags.is_final() {
            if let Some(factory) = factory {
                host.release_factory(factory);
            }
        }
        result
    }
}

/// Sends a response handle exactly once.
#[must_use = "a guard sends when dropped; bind it or call fire()"]
pub struct SendGuard<H: HostChannel> {
    pending: Option<PendingSend<H>>,
}

impl<H: HostChannel> SendGuard<H> {
    pub fn new(
        host: Arc<H>,
        response: H::Response,
        flags: ResponseFlags,
        factory: Option<H::Factory>,
    ) -> Self {
        Self {
            pending: Some(PendingSend {
                host,
                response,
                flags,
                factory,
                error: None,
            }),
        }
    }

    /// Records the error to send with. The first error wins.
    pub fn set_error(&mut self, error: HostError) {
        if let Some(pending) = &mut self.pending {
            pending.error.get_or_insert(error);
        }
    }

    pub fn error(&self) -> Option<&HostError> {
        self.pending.as_ref().and_then(|p| p.error.as_ref())
    }

    pub fn response_mut(&mut self) -> Option<&mut H::Response> {
        self.pending.as_mut().map(|p| &mut p.response)
    }

    /// Sends now. The host's send result is returned and also logged.
    pub fn fire(mut self) -> Result<(), HostError> {
        match self.pending.take() {
            Some(pending) => pending.send(),
            None => Ok(()),
        }
    }

    /// Disarms the guard and returns the unsent response handle and the
    /// owned factory.
    pub fn cancel(mut self) -> Option<(H::Response, Option<H::Factory>)> {
        self.pending.take().map(|p| (p.response, p.factory))
    }
}

impl<H> SendGuard<H>
where
    H: HostChannel + Send + Sync + 'static,
    H::Response: Send + 'static,
    H::Factory: Send + 'static,
{
    /// Moves the pending send into a [`DeferredCompletion`].
    pub fn defer(self) -> DeferredCompletion {
        DeferredCompletion::new(move || {
            // Failures were logged by the send itself.
            let _ = self.fire();
        })
    }
}

impl<H: HostChannel> Drop for SendGuard<H> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.send();
        }
    }
}

impl<H: HostChannel> fmt::Debug for SendGuard<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendGuard")
            .field("armed", &self.pending.is_some())
            .field("error", &self.error())
            .finish()
    }
}

/// A one-shot action retained until an external fill finishes.
///
/// [`fire`](Self::fire) runs the action the first time and does nothing
/// afterwards. An unfired completion fires when dropped.
pub struct DeferredCompletion {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl DeferredCompletion {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// Runs the action if it has not run yet. Returns whether it ran.
    pub fn fire(&mut self) -> bool {
        match self.action.take() {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.action.is_some()
    }
}

impl Drop for DeferredCompletion {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for DeferredCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCompletion")
            .field("pending", &self.is_pending())
            .finish()
    }
}
