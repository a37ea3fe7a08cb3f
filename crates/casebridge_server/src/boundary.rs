//! Exception boundary.
//!
//! The outermost layer of every call and the only place error detail is
//! reduced. Failures, panics included, are logged in full and then turned
//! into a [`tonic::Status`] with a coarse code. The status message is generic
//! unless diagnostic mode is on, in which case it carries the original
//! message verbatim.

use casebridge_core::{BridgeError, BridgeResult, FaultKind};
use futures::{FutureExt, Stream};
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use tonic::{Code, Status};

/// Maps a fault classification to a transport status code.
pub fn status_code(kind: FaultKind) -> Code {
    match kind {
        FaultKind::TransientUnavailable => Code::Unavailable,
        FaultKind::DeadlineExceeded => Code::DeadlineExceeded,
        FaultKind::TransientInternal => Code::Internal,
        FaultKind::ConstraintViolation => Code::FailedPrecondition,
        FaultKind::PermissionDenied => Code::PermissionDenied,
        FaultKind::BadArgument => Code::InvalidArgument,
        FaultKind::NotFound => Code::NotFound,
        FaultKind::MarshalDefect | FaultKind::ShapeMismatch => Code::Internal,
        FaultKind::UnknownOperation => Code::Unimplemented,
        FaultKind::Cancelled => Code::Cancelled,
        FaultKind::Unclassified => Code::Internal,
    }
}

/// Message sent in place of the original one outside diagnostic mode.
pub fn generic_message(code: Code) -> &'static str {
    match code {
        Code::Unavailable => "service temporarily unavailable",
        Code::DeadlineExceeded => "request timed out",
        Code::FailedPrecondition => "request conflicts with current state",
        Code::PermissionDenied => "permission denied",
        Code::InvalidArgument => "invalid request",
        Code::NotFound => "not found",
        Code::Unimplemented => "operation not supported",
        Code::Cancelled => "request cancelled",
        _ => "internal error",
    }
}

/// Sanitizes failures at the edge of the service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionBoundary {
    diagnostic_mode: bool,
}

impl ExceptionBoundary {
    /// Creates a boundary.
    pub fn new(diagnostic_mode: bool) -> Self {
        Self { diagnostic_mode }
    }

    /// Returns true if statuses carry original messages.
    pub fn diagnostic_mode(&self) -> bool {
        self.diagnostic_mode
    }

    /// Converts an error into the status returned to the caller.
    pub fn sanitize(&self, error: &BridgeError) -> Status {
        self.status(status_code(error.kind()), error.to_string())
    }

    fn status(&self, code: Code, detail: String) -> Status {
        if self.diagnostic_mode {
            Status::new(code, detail)
        } else {
            Status::new(code, generic_message(code))
        }
    }

    fn reject(&self, method: &str, error: &BridgeError) -> Status {
        tracing::error!(
            method,
            kind = %error.kind(),
            error = %error,
            source = ?std::error::Error::source(error).map(ToString::to_string),
            "call failed"
        );
        self.sanitize(error)
    }

    fn reject_panic(&self, method: &str, payload: Box<dyn Any + Send>) -> Status {
        let detail = panic_message(payload.as_ref());
        tracing::error!(method, panic = %detail, "call panicked");
        self.status(Code::Internal, detail)
    }

    /// Runs a unary call, converting any failure into a sanitized status.
    pub async fn unary<T, Fut>(&self, method: &str, call: Fut) -> Result<T, Status>
    where
        Fut: Future<Output = BridgeResult<T>>,
    {
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.reject(method, &e)),
            Err(payload) => Err(self.reject_panic(method, payload)),
        }
    }

    /// Runs a server-streaming call.
    ///
    /// Errors while opening the stream and errors carried by stream items are
    /// both sanitized; a panic while polling ends the stream with an internal
    /// status.
    pub async fn server_streaming<S, T, Fut>(
        &self,
        method: &str,
        call: Fut,
    ) -> Result<BoundaryStream<S>, Status>
    where
        S: Stream<Item = BridgeResult<T>> + Unpin,
        Fut: Future<Output = BridgeResult<S>>,
    {
        let inner = self.unary(method, call).await?;
        Ok(BoundaryStream {
            inner,
            boundary: *self,
            method: method.to_string(),
            done: false,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// A stream whose failures are sanitized.
#[derive(Debug)]
pub struct BoundaryStream<S> {
    inner: S,
    boundary: ExceptionBoundary,
    method: String,
    done: bool,
}

impl<S> BoundaryStream<S> {
    /// Returns the wrapped stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S, T> Stream for BoundaryStream<S>
where
    S: Stream<Item = BridgeResult<T>> + Unpin,
{
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let polled = catch_unwind(AssertUnwindSafe(|| Pin::new(&mut this.inner).poll_next(cx)));
        match polled {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(None)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Ok(Poll::Ready(Some(Ok(item)))) => Poll::Ready(Some(Ok(item))),
            Ok(Poll::Ready(Some(Err(e)))) => {
                this.done = true;
                Poll::Ready(Some(Err(this.boundary.reject(&this.method, &e))))
            }
            Err(payload) => {
                this.done = true;
                Poll::Ready(Some(Err(this.boundary.reject_panic(&this.method, payload))))
            }
        }
    }
}
