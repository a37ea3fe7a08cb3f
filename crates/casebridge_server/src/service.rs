//! The case service.
//!
//! Each call runs through three layers, outermost first: the exception
//! boundary, the audit envelope, and the bridge.

use crate::audit::{AuditEnvelope, AuditSink, AuditedStream};
use crate::boundary::{BoundaryStream, ExceptionBoundary};
use crate::catalog::{
    CaseNote, CaseNotesRequest, CaseSummary, CasesByStatusReply, CasesByStatusRequest,
    InsertCaseLogReply, InsertCaseLogRequest, GET_CASES_BY_STATUS, GET_CASE_NOTES,
    INSERT_CASE_LOG, RETURN_VALUE, TOTAL_COUNT,
};
use crate::config::ServerConfig;
use crate::identity::CallerIdentity;
use casebridge_core::{
    Args, Bridge, BridgeError, CallResult, FromRow, OutputValues, RecordStream, ResultRow,
    RetryObserver, StoreValue,
};
use std::sync::Arc;
use tonic::Status;

/// A completed unary call with its records materialized.
#[derive(Debug)]
pub struct CallReply<T> {
    /// Affected-row count, for non-query operations.
    pub rows_affected: Option<i64>,
    /// Records, for query operations.
    pub records: Vec<T>,
    /// Output parameters.
    pub outputs: OutputValues,
}

impl<T> CallReply<T> {
    /// Returns an integer output parameter.
    pub fn output_i32(&self, name: &str) -> Option<i32> {
        match self.outputs.get(name) {
            Some(StoreValue::Int(n)) => Some(*n),
            _ => None,
        }
    }
}

/// A server stream of records as seen by the transport.
pub type CallStream<T> = BoundaryStream<AuditedStream<RecordStream<T>>>;

/// Audited, exception-bounded access to the case operations.
#[derive(Debug, Clone)]
pub struct CaseService {
    bridge: Bridge,
    envelope: AuditEnvelope,
    boundary: ExceptionBoundary,
    config: Arc<ServerConfig>,
}

impl CaseService {
    /// Creates a service.
    pub fn new(bridge: Bridge, sink: Arc<dyn AuditSink>, config: ServerConfig) -> Self {
        Self {
            bridge,
            envelope: AuditEnvelope::new(sink, config.caller_header.clone()),
            boundary: ExceptionBoundary::new(config.diagnostic_mode),
            config: Arc::new(config),
        }
    }

    /// Replaces the bridge's retry observer.
    pub fn with_retry_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.bridge = self.bridge.with_retry_observer(observer);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the bridge.
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Runs a unary operation.
    ///
    /// Records are materialized inside the audit envelope, so a row that does
    /// not fit `T` is audited as a failure.
    pub async fn call<T: FromRow>(
        &self,
        method: &str,
        identity: &dyn CallerIdentity,
        args: Args,
    ) -> Result<CallReply<T>, Status> {
        let bridge = &self.bridge;
        let args = &args;
        let audited = self.envelope.unary(method, identity, move |_ctx| async move {
            let outcome = bridge.invoke::<T>(method, args).await?;
            let (rows_affected, records) = match outcome.result {
                CallResult::RowsAffected(n) => (Some(n), Vec::new()),
                CallResult::Records(records) => (None, records.try_collect()?),
            };
            Ok::<_, BridgeError>(CallReply {
                rows_affected,
                records,
                outputs: outcome.outputs,
            })
        });
        self.boundary.unary(method, audited).await
    }

    /// Runs a server-streaming operation.
    pub async fn call_streaming<T: FromRow + Send + 'static>(
        &self,
        method: &str,
        identity: &dyn CallerIdentity,
        args: Args,
    ) -> Result<CallStream<T>, Status> {
        let bridge = &self.bridge;
        let args = &args;
        let audited = self
            .envelope
            .server_streaming(method, identity, move |_ctx| async move {
                bridge.stream::<T>(method, args).await
            });
        self.boundary.server_streaming(method, audited).await
    }

    /// Appends an entry to a case log.
    pub async fn insert_case_log(
        &self,
        identity: &dyn CallerIdentity,
        request: &InsertCaseLogRequest,
    ) -> Result<InsertCaseLogReply, Status> {
        let reply = self
            .call::<ResultRow>(INSERT_CASE_LOG, identity, request.to_args())
            .await?;
        Ok(InsertCaseLogReply {
            rows_affected: reply.rows_affected.unwrap_or_default(),
            log_id: reply.output_i32(RETURN_VALUE),
        })
    }

    /// Lists cases in a status.
    pub async fn cases_by_status(
        &self,
        identity: &dyn CallerIdentity,
        request: &CasesByStatusRequest,
    ) -> Result<CasesByStatusReply, Status> {
        let reply = self
            .call::<CaseSummary>(GET_CASES_BY_STATUS, identity, request.to_args())
            .await?;
        Ok(CasesByStatusReply {
            total: reply.output_i32(TOTAL_COUNT),
            cases: reply.records,
        })
    }

    /// Streams the notes of a case.
    pub async fn case_notes(
        &self,
        identity: &dyn CallerIdentity,
        request: CaseNotesRequest,
    ) -> Result<CallStream<CaseNote>, Status> {
        self.call_streaming(GET_CASE_NOTES, identity, request.to_args())
            .await
    }
}
