//! End-to-end scenarios through boundary, envelope and bridge.

use casebridge_core::{
    Args, Bridge, BridgeError, FaultKind, FromRow, MaterializeResult, ParamValue, ProcedureStore,
    ResultRow, RetryConfig, RowReader, StoreError,
};
use casebridge_server::{
    case_catalog, AuditOutcome, CallerContext, CaseNotesRequest, CaseService,
    CasesByStatusRequest, InsertCaseLogRequest, MemoryAuditSink, ServerConfig, GET_CASE_NOTES,
    INSERT_CASE_LOG, SUBJECT_CLAIM,
};
use casebridge_testkit::{seeded_case_store, FlakyStore, RecordingRetryObserver, FIRST_LOG_ID};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tonic::Code;

struct Harness {
    service: CaseService,
    audit: Arc<MemoryAuditSink>,
    retries: Arc<RecordingRetryObserver>,
}

fn config() -> ServerConfig {
    ServerConfig::new().with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(4)),
    )
}

fn harness(store: Arc<dyn ProcedureStore>, config: ServerConfig) -> Harness {
    casebridge_server::telemetry::init(false);
    config.validate().unwrap();
    let audit = Arc::new(MemoryAuditSink::new());
    let retries = Arc::new(RecordingRetryObserver::new());
    let bridge = Bridge::new(case_catalog().unwrap(), store, config.bridge.clone());
    let service =
        CaseService::new(bridge, audit.clone(), config).with_retry_observer(retries.clone());
    Harness {
        service,
        audit,
        retries,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn absent_log_id_returns_store_assigned_value() {
    let store = seeded_case_store();
    let h = harness(store.clone(), config());

    let reply = h
        .service
        .insert_case_log(
            &CallerContext::anonymous(),
            &InsertCaseLogRequest::new(3, "customer called back"),
        )
        .await
        .unwrap();

    assert_eq!(reply.rows_affected, 1);
    assert_eq!(reply.log_id, Some(FIRST_LOG_ID));
    assert_eq!(store.stats().output_reads, 1);

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Success);
    assert_eq!(records[0].method, INSERT_CASE_LOG);
}

#[tokio::test]
async fn transient_outage_recovers_on_third_attempt() {
    let flaky = Arc::new(FlakyStore::new(
        seeded_case_store(),
        FaultKind::TransientUnavailable,
        2,
    ));
    let h = harness(flaky.clone(), config());

    let reply = h
        .service
        .insert_case_log(&CallerContext::anonymous(), &InsertCaseLogRequest::new(1, "retry me"))
        .await
        .unwrap();

    assert_eq!(reply.rows_affected, 1);
    assert_eq!(flaky.attempts(), 3);

    let events = h.retries.events();
    assert_eq!(events.len(), 2);
    assert_eq!((events[0].attempt, events[0].delay), (1, Duration::from_millis(1)));
    assert_eq!((events[1].attempt, events[1].delay), (2, Duration::from_millis(2)));
    assert!(events.iter().all(|e| e.kind == FaultKind::TransientUnavailable));

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Success);
}

#[tokio::test]
async fn bad_argument_fails_once_with_sanitized_status() {
    let store = seeded_case_store();
    let h = harness(store.clone(), config());

    let status = h
        .service
        .insert_case_log(&CallerContext::anonymous(), &InsertCaseLogRequest::new(0, "orphan"))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "invalid request");
    assert!(h.retries.is_empty());
    assert_eq!(store.stats().executions, 1);

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Failure);
    assert_eq!(records[0].failure_kind, Some(FaultKind::BadArgument));
}

#[tokio::test]
async fn diagnostic_mode_returns_original_message() {
    let h = harness(seeded_case_store(), config().with_diagnostic_mode(true));

    let status = h
        .service
        .insert_case_log(&CallerContext::anonymous(), &InsertCaseLogRequest::new(0, "orphan"))
        .await
        .unwrap_err();

    let original = BridgeError::store(
        INSERT_CASE_LOG,
        StoreError::bad_argument("caseId must reference an existing case"),
    );
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), original.to_string());
    assert_eq!(h.audit.len(), 1);
}

#[tokio::test]
async fn persistent_outage_spends_the_whole_budget() {
    let flaky = Arc::new(FlakyStore::always(
        seeded_case_store(),
        FaultKind::TransientUnavailable,
    ));
    let h = harness(flaky.clone(), config());

    let status = h
        .service
        .insert_case_log(&CallerContext::anonymous(), &InsertCaseLogRequest::new(1, "lost"))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(flaky.attempts(), 3);
    assert_eq!(h.retries.len(), 2);

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].failure_kind, Some(FaultKind::TransientUnavailable));
}

#[tokio::test]
async fn empty_row_set_still_reads_outputs() {
    let store = seeded_case_store();
    let h = harness(store.clone(), config());

    let reply = h
        .service
        .cases_by_status(
            &CallerContext::anonymous(),
            &CasesByStatusRequest {
                status: "escalated".into(),
                owner_id: ParamValue::Absent,
            },
        )
        .await
        .unwrap();

    assert!(reply.cases.is_empty());
    assert_eq!(reply.total, Some(0));
    assert_eq!(store.stats().output_reads, 1);
}

#[tokio::test]
async fn owner_filter_and_null_owner() {
    let h = harness(seeded_case_store(), config());
    let caller = CallerContext::anonymous();

    let all_open = h
        .service
        .cases_by_status(
            &caller,
            &CasesByStatusRequest {
                status: "open".into(),
                owner_id: ParamValue::Present(0),
            },
        )
        .await
        .unwrap();
    assert_eq!(all_open.cases.len(), 3);
    assert_eq!(all_open.total, Some(3));
    assert!(all_open.cases.iter().any(|c| c.owner_id.is_none()));

    let owned = h
        .service
        .cases_by_status(
            &caller,
            &CasesByStatusRequest {
                status: "open".into(),
                owner_id: ParamValue::Present(9),
            },
        )
        .await
        .unwrap();
    assert_eq!(owned.cases.len(), 1);
    assert_eq!(owned.cases[0].title, "Fraud report");
}

#[tokio::test]
async fn note_stream_drains_then_audits() {
    let store = seeded_case_store();
    let h = harness(store.clone(), config());

    let mut notes = h
        .service
        .case_notes(&CallerContext::anonymous(), CaseNotesRequest { case_id: 5 })
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(note) = notes.next().await {
        seen.push(note.unwrap());
    }

    assert_eq!(seen.len(), 5);
    assert_eq!(seen[1].author, None);
    assert_eq!(seen[0].author.as_deref(), Some("agent"));
    assert!(notes.get_mut().get_mut().outputs().is_some());
    assert_eq!(store.stats().cursors_closed, 1);

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Success);
}

#[tokio::test]
async fn dropping_a_note_stream_closes_the_cursor() {
    let store = seeded_case_store();
    let h = harness(store.clone(), config());

    let mut notes = h
        .service
        .case_notes(&CallerContext::anonymous(), CaseNotesRequest { case_id: 50 })
        .await
        .unwrap();
    assert!(notes.next().await.unwrap().is_ok());
    drop(notes);

    wait_until(|| store.stats().cursors_closed == 1).await;
    assert_eq!(store.stats().cursors_closed, 1);
    assert_eq!(store.stats().output_reads, 0);

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Cancelled);
}

/// A note record whose decoder panics on the second note.
#[derive(Debug)]
struct BrittleNote {
    note_id: i64,
}

impl FromRow for BrittleNote {
    fn from_row(row: &mut RowReader<'_>) -> MaterializeResult<Self> {
        let note_id: i64 = row.next()?;
        if note_id == 2 {
            panic!("note {note_id} has a corrupt body");
        }
        Ok(Self { note_id })
    }
}

#[tokio::test]
async fn panic_mid_stream_is_a_failure() {
    let h = harness(seeded_case_store(), config());

    let mut notes = h
        .service
        .call_streaming::<BrittleNote>(
            GET_CASE_NOTES,
            &CallerContext::anonymous(),
            CaseNotesRequest { case_id: 5 }.to_args(),
        )
        .await
        .unwrap();

    let first = notes.next().await.unwrap().unwrap();
    assert_eq!(first.note_id, 1);
    let status = notes.next().await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "internal error");
    assert!(notes.next().await.is_none());
    assert!(notes.get_mut().get_mut().outputs().is_none());

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Failure);
    assert_eq!(records[0].failure_kind, Some(FaultKind::Unclassified));
}

#[tokio::test]
async fn unknown_operation_is_unimplemented() {
    let h = harness(seeded_case_store(), config());

    let status = h
        .service
        .call::<ResultRow>("CloseCase", &CallerContext::anonymous(), Args::new())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unimplemented);
    assert_eq!(h.audit.records()[0].failure_kind, Some(FaultKind::UnknownOperation));
}

#[tokio::test]
async fn marshal_defect_never_reaches_the_store() {
    let store = seeded_case_store();
    let h = harness(store.clone(), config());

    let status = h
        .service
        .call::<ResultRow>(
            INSERT_CASE_LOG,
            &CallerContext::anonymous(),
            Args::new()
                .absent::<i32>("logId")
                .value("caseId", "three")
                .value("entry", "typo")
                .absent::<Vec<u8>>("attachment"),
        )
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(store.stats().connections, 0);
    assert!(h.retries.is_empty());
    assert_eq!(h.audit.records()[0].failure_kind, Some(FaultKind::MarshalDefect));
}

#[tokio::test]
async fn concurrent_calls_each_audit_once() {
    let h = harness(seeded_case_store(), config());
    let caller = CallerContext::anonymous().with_claim(SUBJECT_CLAIM, "u-42");

    let calls = (1..=10).map(|case_id| {
        let service = h.service.clone();
        let caller = caller.clone();
        async move {
            service
                .insert_case_log(&caller, &InsertCaseLogRequest::new(case_id, "bulk"))
                .await
        }
    });
    let replies = futures::future::join_all(calls).await;

    assert!(replies.iter().all(Result::is_ok));
    let ids: HashSet<_> = replies
        .into_iter()
        .filter_map(|r| r.ok().and_then(|reply| reply.log_id))
        .collect();
    assert_eq!(ids.len(), 10);

    let records = h.audit.records();
    assert_eq!(records.len(), 10);
    let correlation_ids: HashSet<_> = records.iter().map(|r| r.correlation_id).collect();
    assert_eq!(correlation_ids.len(), 10);
    assert!(records.iter().all(|r| r.caller == "u-42"));
}

#[tokio::test]
async fn caller_header_is_recorded() {
    let h = harness(
        seeded_case_store(),
        config().with_caller_header("x-on-behalf-of"),
    );
    let caller = CallerContext::anonymous().with_header("x-on-behalf-of", "svc-intake");

    h.service
        .insert_case_log(&caller, &InsertCaseLogRequest::new(2, "forwarded"))
        .await
        .unwrap();

    assert_eq!(h.audit.records()[0].caller, "svc-intake");
}
