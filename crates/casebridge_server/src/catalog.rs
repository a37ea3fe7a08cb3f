//! Case-management operations.
//!
//! The standard call specs, their request types and the records
//! their row sets materialize into.

use casebridge_core::{
    Args, CallSpec, DispatchTable, FromRow, MarshalResult, MaterializeResult, ParamSpec,
    ParamValue, RowReader, SqlType,
};
use chrono::NaiveDateTime;

/// Appends an entry to a case's log.
pub const INSERT_CASE_LOG: &str = "InsertCaseLog";
/// Lists cases in a given status.
pub const GET_CASES_BY_STATUS: &str = "GetCasesByStatus";
/// Streams the notes of one case.
pub const GET_CASE_NOTES: &str = "GetCaseNotes";

/// Output parameter carrying a procedure's return value.
pub const RETURN_VALUE: &str = "returnValue";
/// Output parameter carrying the total row count of a listing.
pub const TOTAL_COUNT: &str = "totalCount";

/// Maximum length of a log entry.
pub const LOG_ENTRY_MAX: u32 = 500;
/// Maximum length of a status code.
pub const STATUS_MAX: u32 = 20;

/// Returns the call spec of `InsertCaseLog`.
///
/// `logId` is usually absent and assigned by the store; non-positive ids
/// count as absent.
pub fn insert_case_log() -> CallSpec {
    CallSpec::non_query(INSERT_CASE_LOG, "usp_InsertCaseLog")
        .param(ParamSpec::input("logId", SqlType::Int).zero_as_absent())
        .param(ParamSpec::input("caseId", SqlType::Int))
        .param(ParamSpec::input("entry", SqlType::Text).bounded(LOG_ENTRY_MAX))
        .param(ParamSpec::input("attachment", SqlType::Binary).unbounded())
        .param(ParamSpec::output(RETURN_VALUE, SqlType::Int))
}

/// Returns the call spec of `GetCasesByStatus`.
pub fn get_cases_by_status() -> CallSpec {
    CallSpec::query(GET_CASES_BY_STATUS, "usp_GetCasesByStatus")
        .param(ParamSpec::input("status", SqlType::Text).bounded(STATUS_MAX))
        .param(ParamSpec::input("ownerId", SqlType::Int).zero_as_absent())
        .param(ParamSpec::output(TOTAL_COUNT, SqlType::Int))
}

/// Returns the call spec of `GetCaseNotes`.
pub fn get_case_notes() -> CallSpec {
    CallSpec::query(GET_CASE_NOTES, "usp_GetCaseNotes")
        .param(ParamSpec::input("caseId", SqlType::Int))
        .param(ParamSpec::output(RETURN_VALUE, SqlType::Int))
}

/// Builds the dispatch table of all case operations.
pub fn case_catalog() -> MarshalResult<DispatchTable> {
    DispatchTable::new()
        .with(insert_case_log())?
        .with(get_cases_by_status())?
        .with(get_case_notes())
}

/// Request for `InsertCaseLog`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertCaseLogRequest {
    /// Explicit log id, normally absent.
    pub log_id: ParamValue<i32>,
    /// Case the entry belongs to.
    pub case_id: i32,
    /// Entry text.
    pub entry: String,
    /// Optional attachment.
    pub attachment: ParamValue<Vec<u8>>,
}

impl InsertCaseLogRequest {
    /// Creates a request with a store-assigned id and no attachment.
    pub fn new(case_id: i32, entry: impl Into<String>) -> Self {
        Self {
            log_id: ParamValue::Absent,
            case_id,
            entry: entry.into(),
            attachment: ParamValue::Absent,
        }
    }

    /// Converts into bridge arguments.
    pub fn to_args(&self) -> Args {
        Args::new()
            .with("logId", self.log_id.clone())
            .value("caseId", self.case_id)
            .value("entry", self.entry.as_str())
            .with("attachment", self.attachment.clone())
    }
}

/// Reply for `InsertCaseLog`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertCaseLogReply {
    /// Rows written.
    pub rows_affected: i64,
    /// Id assigned by the store, if it reported one.
    pub log_id: Option<i32>,
}

/// Request for `GetCasesByStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasesByStatusRequest {
    /// Status code to match.
    pub status: String,
    /// Owner filter; absent lists every owner.
    pub owner_id: ParamValue<i32>,
}

impl CasesByStatusRequest {
    /// Converts into bridge arguments.
    pub fn to_args(&self) -> Args {
        Args::new()
            .value("status", self.status.as_str())
            .with("ownerId", self.owner_id.clone())
    }
}

/// Reply for `GetCasesByStatus`.
#[derive(Debug, Clone, PartialEq)]
pub struct CasesByStatusReply {
    /// Matching cases.
    pub cases: Vec<CaseSummary>,
    /// Total matches reported by the store.
    pub total: Option<i32>,
}

/// Request for `GetCaseNotes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseNotesRequest {
    /// Case whose notes to stream.
    pub case_id: i32,
}

impl CaseNotesRequest {
    /// Converts into bridge arguments.
    pub fn to_args(&self) -> Args {
        Args::new().value("caseId", self.case_id)
    }
}

/// One row of `GetCasesByStatus`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseSummary {
    /// Case id.
    pub case_id: i32,
    /// Case title.
    pub title: String,
    /// Status code.
    pub status: String,
    /// Assigned owner, if any.
    pub owner_id: Option<i32>,
    /// When the case was opened.
    pub opened_at: NaiveDateTime,
}

impl FromRow for CaseSummary {
    fn from_row(row: &mut RowReader<'_>) -> MaterializeResult<Self> {
        Ok(Self {
            case_id: row.next()?,
            title: row.next()?,
            status: row.next()?,
            owner_id: row.next()?,
            opened_at: row.next()?,
        })
    }
}

/// One row of `GetCaseNotes`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseNote {
    /// Note id.
    pub note_id: i64,
    /// Case the note belongs to.
    pub case_id: i32,
    /// Author, when known.
    pub author: Option<String>,
    /// Note text.
    pub body: String,
    /// When the note was written.
    pub created_at: NaiveDateTime,
}

impl FromRow for CaseNote {
    fn from_row(row: &mut RowReader<'_>) -> MaterializeResult<Self> {
        Ok(Self {
            note_id: row.next()?,
            case_id: row.next()?,
            author: row.next()?,
            body: row.next()?,
            created_at: row.next()?,
        })
    }
}
