//! Test fixtures and store helpers.
//!
//! Provides fault-injecting stores, a recording retry observer and a
//! procedure store seeded with case-management data.

use async_trait::async_trait;
use casebridge_core::{
    FaultKind, InMemoryStore, ProcedureResponse, ProcedureStore, ResultRow, RetryEvent,
    RetryObserver, StoreConnection, StoreError, StoreResult, StoreValue,
};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A store that fails its first `failures` connection attempts.
///
/// Later attempts go to the wrapped [`InMemoryStore`].
pub struct FlakyStore {
    inner: Arc<InMemoryStore>,
    kind: FaultKind,
    failures: u32,
    attempts: AtomicU32,
}

impl FlakyStore {
    /// Wraps `inner`, failing the first `failures` attempts with `kind`.
    pub fn new(inner: Arc<InMemoryStore>, kind: FaultKind, failures: u32) -> Self {
        Self {
            inner,
            kind,
            failures,
            attempts: AtomicU32::new(0),
        }
    }

    /// Wraps `inner`, failing every attempt with `kind`.
    pub fn always(inner: Arc<InMemoryStore>, kind: FaultKind) -> Self {
        Self::new(inner, kind, u32::MAX)
    }

    /// Returns the number of connection attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

#[async_trait]
impl ProcedureStore for FlakyStore {
    async fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(StoreError::new(
                self.kind,
                format!("injected {} on attempt {attempt}", self.kind),
            ));
        }
        self.inner.connect().await
    }
}

/// A retry event captured by [`RecordingRetryObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRetry {
    /// Operation retried.
    pub operation: String,
    /// One-based index of the failed attempt.
    pub attempt: u32,
    /// Delay before the next attempt.
    pub delay: Duration,
    /// Classification of the failure.
    pub kind: FaultKind,
}

/// Keeps every retry event in memory.
#[derive(Debug, Default)]
pub struct RecordingRetryObserver {
    events: Mutex<Vec<RecordedRetry>>,
}

impl RecordingRetryObserver {
    /// Creates an empty observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event so far.
    pub fn events(&self) -> Vec<RecordedRetry> {
        self.events.lock().clone()
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if no retry happened.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl RetryObserver for RecordingRetryObserver {
    fn on_retry(&self, event: &RetryEvent<'_>) {
        self.events.lock().push(RecordedRetry {
            operation: event.operation.to_string(),
            attempt: event.attempt,
            delay: event.delay,
            kind: event.kind,
        });
    }
}

/// First log id the seeded store assigns.
pub const FIRST_LOG_ID: i32 = 1001;

fn timestamp(s: &str) -> StoreValue {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(StoreValue::DateTime)
        .unwrap_or(StoreValue::Null)
}

fn case_row(case_id: i32, title: &str, status: &str, owner: Option<i32>, opened: &str) -> ResultRow {
    ResultRow::new()
        .with("caseId", StoreValue::Int(case_id))
        .with("title", StoreValue::Text(title.into()))
        .with("status", StoreValue::Text(status.into()))
        .with("ownerId", owner.map_or(StoreValue::Null, StoreValue::Int))
        .with("openedAt", timestamp(opened))
}

fn note_row(note_id: i64, case_id: i32, author: Option<&str>, body: &str, at: &str) -> ResultRow {
    ResultRow::new()
        .with("noteId", StoreValue::BigInt(note_id))
        .with("caseId", StoreValue::Int(case_id))
        .with(
            "author",
            author.map_or(StoreValue::Null, |a| StoreValue::Text(a.into())),
        )
        .with("body", StoreValue::Text(body.into()))
        .with("createdAt", timestamp(at))
}

fn seeded_cases() -> Vec<ResultRow> {
    vec![
        case_row(1, "Billing dispute", "open", Some(7), "2024-01-04 10:00:00"),
        case_row(2, "Address change", "closed", Some(7), "2024-01-09 14:30:00"),
        case_row(3, "Lost card", "open", None, "2024-02-11 08:15:00"),
        case_row(4, "Fraud report", "open", Some(9), "2024-02-20 16:45:00"),
    ]
}

/// Creates an in-memory store implementing the case procedures.
///
/// - `usp_InsertCaseLog` assigns ids from [`FIRST_LOG_ID`] and reports them in
///   `returnValue`; a non-positive `caseId` is rejected as a bad argument.
/// - `usp_GetCasesByStatus` filters four seeded cases by `status` and, when
///   bound, `ownerId`; it reports the match count in `totalCount`.
/// - `usp_GetCaseNotes` returns `n` notes for case `n` (up to 50).
pub fn seeded_case_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    let next_log_id = Arc::new(AtomicI32::new(FIRST_LOG_ID));

    store.register("usp_InsertCaseLog", move |call| {
        match call.value("caseId").as_i64() {
            Some(case_id) if case_id > 0 => {}
            _ => return Err(StoreError::bad_argument("caseId must reference an existing case")),
        }
        let log_id = match call.value("logId") {
            StoreValue::Int(id) => *id,
            _ => next_log_id.fetch_add(1, Ordering::SeqCst),
        };
        Ok(ProcedureResponse::affected(1).with_output("returnValue", StoreValue::Int(log_id)))
    });

    store.register("usp_GetCasesByStatus", |call| {
        let status = call.value("status").as_str().unwrap_or_default().to_string();
        let owner = call.value("ownerId").as_i64();
        let rows: Vec<ResultRow> = seeded_cases()
            .into_iter()
            .filter(|row| row.get("status").and_then(StoreValue::as_str) == Some(status.as_str()))
            .filter(|row| owner.is_none() || row.get("ownerId").and_then(StoreValue::as_i64) == owner)
            .collect();
        let total = rows.len() as i32;
        Ok(ProcedureResponse::rows(rows).with_output("totalCount", StoreValue::Int(total)))
    });

    store.register("usp_GetCaseNotes", |call| {
        let case_id = call.value("caseId").as_i64().unwrap_or_default().clamp(0, 50);
        let rows = (1..=case_id)
            .map(|n| {
                let author = if n % 2 == 0 { None } else { Some("agent") };
                note_row(n, case_id as i32, author, "follow-up", "2024-03-01 09:00:00")
            })
            .collect();
        Ok(ProcedureResponse::rows(rows).with_output("returnValue", StoreValue::Int(0)))
    });

    store
}
