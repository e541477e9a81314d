// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The response entity.

use crate::{DeferredCompletion, InferError, ResponseError};
use shm_arena::ShmHandle;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tensor_core::Tensor;
use tokio::sync::oneshot;

/// What a response carries: output tensors, or an error in their place.
#[derive(Debug, Clone)]
pub enum ResponsePayload {
    Outputs(Vec<Arc<Tensor>>),
    Failure(InferError),
}

/// The consumer end of a decoupled response's next-response channel.
pub type NextResponse = oneshot::Receiver<Response>;

/// The producer end of a decoupled response's next-response channel.
#[derive(Debug)]
pub struct NextResponseSender(oneshot::Sender<Response>);

impl NextResponseSender {
    /// Resolves the channel. Gives the response back if the consumer is gone.
    pub fn send(self, response: Response) -> Result<(), Response> {
        self.0.send(response)
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// One inference result.
///
/// A response is built by the worker after a model step, encoded into a
/// [`shm_arena::ShmArena`], decoded by the host side and finally delivered
/// with [`Response::send`].
pub struct Response {
    pub(crate) payload: ResponsePayload,
    pub(crate) next_response: Option<NextResponse>,
    pub(crate) shm_handle: Option<ShmHandle>,
    pub(crate) deferred: Option<DeferredCompletion>,
}

impl Response {
    /// Builds a response from output slots and an optional error.
    ///
    /// Every slot must hold a tensor. When `error` is set the response is a
    /// failure and the outputs are dropped.
    pub fn new(outputs: Vec<Option<Arc<Tensor>>>, error: Option<InferError>) -> Result<Self, ResponseError> {
        let outputs = collect_outputs(outputs)?;
        Ok(Self::from_payload(payload_of(outputs, error), None))
    }

    /// Like [`new`](Self::new), for one step of a decoupled request.
    ///
    /// Returns the response and the producer end of its next-response
    /// channel; [`take_next_response`](Self::take_next_response) yields the
    /// consumer end.
    pub fn new_decoupled(
        outputs: Vec<Option<Arc<Tensor>>>,
        error: Option<InferError>,
    ) -> Result<(Self, NextResponseSender), ResponseError> {
        let outputs = collect_outputs(outputs)?;
        let (tx, rx) = oneshot::channel();
        let response = Self::from_payload(payload_of(outputs, error), Some(rx));
        Ok((response, NextResponseSender(tx)))
    }

    /// A successful response over tensors that are known to be present.
    pub fn from_outputs(outputs: Vec<Arc<Tensor>>) -> Self {
        Self::from_payload(ResponsePayload::Outputs(outputs), None)
    }

    pub fn from_error(error: InferError) -> Self {
        Self::from_payload(ResponsePayload::Failure(error), None)
    }

    pub(crate) fn from_payload(payload: ResponsePayload, next_response: Option<NextResponse>) -> Self {
        Self {
            payload,
            next_response,
            shm_handle: None,
            deferred: None,
        }
    }

    pub fn payload(&self) -> &ResponsePayload {
        &self.payload
    }

    pub fn has_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Failure(_))
    }

    pub fn error(&self) -> Option<&InferError> {
        match &self.payload {
            ResponsePayload::Failure(error) => Some(error),
            ResponsePayload::Outputs(_) => None,
        }
    }

    /// The output tensors, empty for a failed response.
    pub fn outputs(&self) -> &[Arc<Tensor>] {
        match &self.payload {
            ResponsePayload::Outputs(outputs) => outputs,
            ResponsePayload::Failure(_) => &[],
        }
    }

    /// Keeps only the outputs named in `requested`, in their current order.
    pub fn prune_output_tensors(&mut self, requested: &HashSet<String>) {
        if let ResponsePayload::Outputs(outputs) = &mut self.payload {
            outputs.retain(|t| requested.contains(t.name()));
        }
    }

    /// Moves the next-response consumer out. Returns `None` for a
    /// non-decoupled response and on every call after the first.
    pub fn take_next_response(&mut self) -> Option<NextResponse> {
        self.next_response.take()
    }

    /// The handle of this response's record, once it has been encoded or
    /// when it was decoded.
    pub fn shm_handle(&self) -> Option<ShmHandle> {
        self.shm_handle
    }

    /// Whether a send is waiting in [`deferred_send_callback`](Self::deferred_send_callback).
    pub fn has_deferred_send(&self) -> bool {
        self.deferred.as_ref().is_some_and(DeferredCompletion::is_pending)
    }

    /// Performs a send that [`send`](Self::send) deferred. Returns whether a
    /// send ran; later calls do nothing.
    pub fn deferred_send_callback(&mut self) -> bool {
        match self.deferred.as_mut() {
            Some(deferred) => deferred.fire(),
            None => false,
        }
    }
}

fn collect_outputs(slots: Vec<Option<Arc<Tensor>>>) -> Result<Vec<Arc<Tensor>>, ResponseError> {
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                ResponseError::InvalidArgument(format!("output tensor at position {index} is missing"))
            })
        })
        .collect()
}

fn payload_of(outputs: Vec<Arc<Tensor>>, error: Option<InferError>) -> ResponsePayload {
    match error {
        Some(error) => ResponsePayload::Failure(error),
        None => ResponsePayload::Outputs(outputs),
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("payload", &self.payload)
            .field("decoupled", &self.next_response.is_some())
            .field("shm_handle", &self.shm_handle)
            .field("deferred", &self.deferred)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{DType, Shape};

    fn tensor(name: &str) -> Arc<Tensor> {
        Arc::new(Tensor::zeros(name, Shape::vector(2), DType::F32))
    }

    fn names(response: &Response) -> Vec<&str> {
        response.outputs().iter().map(|t| t.name()).collect()
    }

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_output_rejected_at_any_position() {
        for position in 0..3 {
            let mut slots: Vec<_> = ["a", "b", "c"].iter().map(|n| Some(tensor(n))).collect();
            slots[position] = None;
            let err = Response::new(slots, None).unwrap_err();
            assert!(matches!(err, ResponseError::InvalidArgument(_)));
        }
        assert!(Response::new_decoupled(vec![None], None).is_err());
    }

    #[test]
    fn test_error_wins_over_outputs() {
        let r = Response::new(vec![Some(tensor("a"))], Some(InferError::new("bad input"))).unwrap();
        assert!(r.has_error());
        assert_eq!(r.error().unwrap().message(), "bad input");
        assert!(r.outputs().is_empty());
    }

    #[test]
    fn test_prune_subset_keeps_order() {
        let mut r = Response::from_outputs(vec![tensor("a"), tensor("b"), tensor("c"), tensor("d")]);
        r.prune_output_tensors(&set(&["d", "b"]));
        assert_eq!(names(&r), vec!["b", "d"]);
    }

    #[test]
    fn test_prune_empty_and_all() {
        let mut r = Response::from_outputs(vec![tensor("a"), tensor("b")]);
        r.prune_output_tensors(&set(&["a", "b", "unrelated"]));
        assert_eq!(names(&r), vec!["a", "b"]);

        r.prune_output_tensors(&HashSet::new());
        assert!(r.outputs().is_empty());
        assert!(!r.has_error());
    }

    #[test]
    fn test_take_next_response_once() {
        let (mut r, tx) = Response::new_decoupled(vec![Some(tensor("a"))], None).unwrap();
        let mut rx = r.take_next_response().unwrap();
        assert!(r.take_next_response().is_none());

        tx.send(Response::from_error(InferError::new("done"))).unwrap();
        let next = rx.try_recv().unwrap();
        assert!(next.has_error());
    }

    #[test]
    fn test_plain_response_has_no_next() {
        let mut r = Response::from_outputs(vec![]);
        assert!(r.take_next_response().is_none());
        assert!(r.shm_handle().is_none());
        assert!(!r.deferred_send_callback());
    }

    #[test]
    fn test_sender_sees_closed_consumer() {
        let (mut r, tx) = Response::new_decoupled(vec![], None).unwrap();
        drop(r.take_next_response());
        assert!(tx.is_closed());
    }
}
