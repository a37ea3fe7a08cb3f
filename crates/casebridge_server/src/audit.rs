//! Audit envelope.
//!
//! Every call, unary or server-streaming, produces exactly one
//! [`AuditRecord`]: `Success` when the handler returns (or the stream is
//! drained), `Failure` when it errors or panics, and `Cancelled` when the
//! caller goes away first. The envelope never alters the handler's result.

use crate::identity::{resolve_caller, CallerIdentity};
use casebridge_core::{BridgeResult, FaultKind};
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use uuid::Uuid;

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The handler returned normally.
    Success,
    /// The handler returned an error or panicked.
    Failure,
    /// The caller dropped the call before it completed.
    Cancelled,
}

/// One audit event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// Id minted for the call.
    pub correlation_id: Uuid,
    /// Method name.
    pub method: String,
    /// Resolved caller.
    pub caller: String,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Elapsed time in milliseconds.
    pub duration_ms: u64,
    /// How the call ended.
    pub outcome: AuditOutcome,
    /// Classification of the failure, for failed calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FaultKind>,
}

impl AuditRecord {
    /// Renders the record as a single JSON line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Receives audit records.
pub trait AuditSink: Send + Sync {
    /// Records one event.
    fn record(&self, record: &AuditRecord);
}

/// Writes audit records as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        match record.outcome {
            AuditOutcome::Success => tracing::info!(
                correlation_id = %record.correlation_id,
                method = %record.method,
                caller = %record.caller,
                duration_ms = record.duration_ms,
                outcome = "success",
                "call completed"
            ),
            AuditOutcome::Failure => tracing::warn!(
                correlation_id = %record.correlation_id,
                method = %record.method,
                caller = %record.caller,
                duration_ms = record.duration_ms,
                outcome = "failure",
                kind = record.failure_kind.map(FaultKind::as_str),
                "call failed"
            ),
            AuditOutcome::Cancelled => tracing::info!(
                correlation_id = %record.correlation_id,
                method = %record.method,
                caller = %record.caller,
                duration_ms = record.duration_ms,
                outcome = "cancelled",
                "call cancelled"
            ),
        }
    }
}

/// Keeps audit records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Returns the records for one method.
    pub fn for_method(&self, method: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Per-call context handed to the wrapped handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Id minted for the call.
    pub correlation_id: Uuid,
    /// Method name.
    pub method: String,
    /// Resolved caller.
    pub caller: String,
}

/// Guard that emits the audit record for one call.
///
/// Emits `Cancelled` if dropped without being finished, or `Failure` if
/// dropped while a panic unwinds through it.
struct AuditScope {
    sink: Arc<dyn AuditSink>,
    context: CallContext,
    started: Instant,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl AuditScope {
    fn new(sink: Arc<dyn AuditSink>, context: CallContext) -> Self {
        Self {
            sink,
            context,
            started: Instant::now(),
            started_at: Utc::now(),
            finished: false,
        }
    }

    fn success(mut self) {
        self.emit(AuditOutcome::Success, None);
    }

    fn failure(mut self, kind: FaultKind) {
        self.emit(AuditOutcome::Failure, Some(kind));
    }

    fn emit(&mut self, outcome: AuditOutcome, failure_kind: Option<FaultKind>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.sink.record(&AuditRecord {
            correlation_id: self.context.correlation_id,
            method: self.context.method.clone(),
            caller: self.context.caller.clone(),
            started_at: self.started_at,
            duration_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
            failure_kind,
        });
    }
}

impl Drop for AuditScope {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.emit(AuditOutcome::Failure, Some(FaultKind::Unclassified));
        } else {
            self.emit(AuditOutcome::Cancelled, None);
        }
    }
}

/// Wraps handlers with exactly-once audit records.
#[derive(Clone)]
pub struct AuditEnvelope {
    sink: Arc<dyn AuditSink>,
    caller_header: String,
}

impl AuditEnvelope {
    /// Creates an envelope writing to `sink`.
    pub fn new(sink: Arc<dyn AuditSink>, caller_header: impl Into<String>) -> Self {
        Self {
            sink,
            caller_header: caller_header.into(),
        }
    }

    fn open(&self, method: &str, identity: &dyn CallerIdentity) -> AuditScope {
        let context = CallContext {
            correlation_id: Uuid::new_v4(),
            method: method.to_string(),
            caller: resolve_caller(identity, &self.caller_header),
        };
        AuditScope::new(Arc::clone(&self.sink), context)
    }

    /// Audits a unary call.
    pub async fn unary<T, F, Fut>(
        &self,
        method: &str,
        identity: &dyn CallerIdentity,
        handler: F,
    ) -> BridgeResult<T>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let scope = self.open(method, identity);
        let result = handler(scope.context.clone()).await;
        match &result {
            Ok(_) => scope.success(),
            Err(e) => scope.failure(e.kind()),
        }
        result
    }

    /// Audits a server-streaming call.
    ///
    /// The record is written when the returned stream ends, fails, or is
    /// dropped; or right away if the handler fails before producing one.
    pub async fn server_streaming<S, T, F, Fut>(
        &self,
        method: &str,
        identity: &dyn CallerIdentity,
        handler: F,
    ) -> BridgeResult<AuditedStream<S>>
    where
        S: Stream<Item = BridgeResult<T>> + Unpin,
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = BridgeResult<S>>,
    {
        let scope = self.open(method, identity);
        match handler(scope.context.clone()).await {
            Ok(inner) => Ok(AuditedStream {
                inner,
                context: scope.context.clone(),
                scope: Some(scope),
            }),
            Err(e) => {
                scope.failure(e.kind());
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for AuditEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEnvelope")
            .field("caller_header", &self.caller_header)
            .finish_non_exhaustive()
    }
}

/// A stream whose completion is audited.
pub struct AuditedStream<S> {
    inner: S,
    context: CallContext,
    scope: Option<AuditScope>,
}

impl<S> AuditedStream<S> {
    /// Returns the call context.
    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Returns the wrapped stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S, T> Stream for AuditedStream<S>
where
    S: Stream<Item = BridgeResult<T>> + Unpin,
{
    type Item = BridgeResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.scope.is_none() {
            return Poll::Ready(None);
        }

        let polled = catch_unwind(AssertUnwindSafe(|| Pin::new(&mut this.inner).poll_next(cx)));
        let item = match polled {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(item)) => item,
            Err(payload) => {
                if let Some(scope) = this.scope.take() {
                    scope.failure(FaultKind::Unclassified);
                }
                resume_unwind(payload)
            }
        };
        match &item {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if let Some(scope) = this.scope.take() {
                    scope.failure(e.kind());
                }
            }
            None => {
                if let Some(scope) = this.scope.take() {
                    scope.success();
                }
            }
        }
        Poll::Ready(item)
    }
}

impl<S> std::fmt::Debug for AuditedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditedStream")
            .field("context", &self.context)
            .field("open", &self.scope.is_some())
            .finish_non_exhaustive()
    }
}
