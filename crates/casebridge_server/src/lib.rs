//! # Casebridge Server
//!
//! Audited, exception-bounded RPC surface over the case-management bridge.
//!
//! This crate provides:
//! - Caller identity resolution that never fails
//! - An audit envelope emitting exactly one record per call
//! - An exception boundary mapping failures to sanitized `tonic::Status` values
//! - The case operation catalog and its record types
//! - [`CaseService`], composing the layers over a [`casebridge_core::Bridge`]
//!
//! # Layers
//!
//! Every call passes, outermost first, through:
//! 1. The exception boundary (logs full detail, returns a coarse status)
//! 2. The audit envelope (correlation id, caller, duration, outcome)
//! 3. The bridge (marshal, invoke under the retry policy, materialize)
//!
//! ```rust,ignore
//! use casebridge_server::{case_catalog, CallerContext, CaseService, ServerConfig, TracingAuditSink};
//!
//! let config = ServerConfig::default();
//! config.validate()?;
//! let bridge = Bridge::new(case_catalog()?, store, config.bridge.clone());
//! let service = CaseService::new(bridge, Arc::new(TracingAuditSink), config);
//!
//! let reply = service
//!     .insert_case_log(&CallerContext::anonymous(), &InsertCaseLogRequest::new(12, "opened"))
//!     .await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod audit;
mod boundary;
mod catalog;
mod config;
mod error;
mod identity;
mod service;
pub mod telemetry;

pub use audit::{
    AuditEnvelope, AuditOutcome, AuditRecord, AuditSink, AuditedStream, CallContext,
    MemoryAuditSink, TracingAuditSink,
};
pub use boundary::{generic_message, status_code, BoundaryStream, ExceptionBoundary};
pub use catalog::{
    case_catalog, get_case_notes, get_cases_by_status, insert_case_log, CaseNote,
    CaseNotesRequest, CaseSummary, CasesByStatusReply, CasesByStatusRequest,
    InsertCaseLogReply, InsertCaseLogRequest, GET_CASES_BY_STATUS, GET_CASE_NOTES,
    INSERT_CASE_LOG, LOG_ENTRY_MAX, RETURN_VALUE, STATUS_MAX, TOTAL_COUNT,
};
pub use config::{ServerConfig, DEFAULT_CALLER_HEADER};
pub use error::{ConfigError, ConfigResult, IdentityError};
pub use identity::{
    resolve_caller, CallerContext, CallerIdentity, ANONYMOUS, NAME_CLAIM, SUBJECT_CLAIM, UNKNOWN,
};
pub use service::{CallReply, CallStream, CaseService};
