//! Error types for the procedure bridge.

use crate::types::{ParamSize, SqlType};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Result type for parameter marshaling.
pub type MarshalResult<T> = Result<T, MarshalError>;

/// Result type for row materialization.
pub type MaterializeResult<T> = Result<T, MaterializeError>;

/// Result type for backing store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse classification of a failure.
///
/// The resilience policy only looks at this value when deciding whether to
/// re-attempt a call, and the exception boundary only looks at it when
/// choosing a transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The store is temporarily unreachable.
    TransientUnavailable,
    /// An attempt did not finish within its bounded wait.
    DeadlineExceeded,
    /// The store reported an internal error that is expected to clear.
    TransientInternal,
    /// A constraint (unique, foreign key, check) rejected the call.
    ConstraintViolation,
    /// The caller lacks permission for the operation.
    PermissionDenied,
    /// The store rejected an argument.
    BadArgument,
    /// The requested entity does not exist.
    NotFound,
    /// A call site bound a value that does not match its declaration.
    MarshalDefect,
    /// A returned row does not match the record it was bound to.
    ShapeMismatch,
    /// No call spec is registered for the operation.
    UnknownOperation,
    /// The call was abandoned before completion.
    Cancelled,
    /// Anything not covered by the other kinds.
    Unclassified,
}

impl FaultKind {
    /// Returns true if a fault of this kind may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FaultKind::TransientUnavailable
                | FaultKind::DeadlineExceeded
                | FaultKind::TransientInternal
        )
    }

    /// Returns the stable snake_case name used in structured events.
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::TransientUnavailable => "transient_unavailable",
            FaultKind::DeadlineExceeded => "deadline_exceeded",
            FaultKind::TransientInternal => "transient_internal",
            FaultKind::ConstraintViolation => "constraint_violation",
            FaultKind::PermissionDenied => "permission_denied",
            FaultKind::BadArgument => "bad_argument",
            FaultKind::NotFound => "not_found",
            FaultKind::MarshalDefect => "marshal_defect",
            FaultKind::ShapeMismatch => "shape_mismatch",
            FaultKind::UnknownOperation => "unknown_operation",
            FaultKind::Cancelled => "cancelled",
            FaultKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault reported by the backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StoreError {
    /// Classification of the fault.
    pub kind: FaultKind,
    /// Message as reported by the store.
    pub message: String,
}

impl StoreError {
    /// Creates a store error of the given kind.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The store could not be reached.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TransientUnavailable, message)
    }

    /// The store reported a transient internal error (deadlock victim, failover).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TransientInternal, message)
    }

    /// The store's own command timeout elapsed.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FaultKind::DeadlineExceeded, message)
    }

    /// A constraint rejected the call.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ConstraintViolation, message)
    }

    /// The caller is not permitted to execute the procedure.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(FaultKind::PermissionDenied, message)
    }

    /// The store rejected an argument.
    pub fn bad_argument(message: impl Into<String>) -> Self {
        Self::new(FaultKind::BadArgument, message)
    }

    /// The procedure or entity does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FaultKind::NotFound, message)
    }

    /// A fault the store could not classify.
    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Unclassified, message)
    }
}

/// A call site bound arguments that do not match the call spec.
///
/// These are contract defects, not runtime conditions: they are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// A declared input parameter has no argument.
    #[error("operation {operation}: missing argument for parameter {name}")]
    MissingArgument {
        /// Operation being marshaled.
        operation: String,
        /// Parameter name.
        name: String,
    },

    /// An argument names no declared input parameter.
    #[error("operation {operation}: argument {name} is not a declared input")]
    UnknownArgument {
        /// Operation being marshaled.
        operation: String,
        /// Argument name.
        name: String,
    },

    /// More than one argument names the same parameter.
    #[error("operation {operation}: argument {name} is supplied more than once")]
    DuplicateArgument {
        /// Operation being marshaled.
        operation: String,
        /// Argument name.
        name: String,
    },

    /// The argument's type tag disagrees with the declaration.
    #[error("parameter {name}: declared {declared}, supplied {supplied}")]
    TypeMismatch {
        /// Parameter name.
        name: String,
        /// Declared type.
        declared: SqlType,
        /// Type of the supplied value.
        supplied: SqlType,
    },

    /// The value would be truncated by the declared size.
    #[error("parameter {name}: value length {actual} exceeds declared size {declared}")]
    Oversize {
        /// Parameter name.
        name: String,
        /// Declared size.
        declared: ParamSize,
        /// Length of the supplied value.
        actual: usize,
    },

    /// The call spec itself is malformed.
    #[error("invalid call spec for {operation}: {reason}")]
    InvalidSpec {
        /// Operation being registered.
        operation: String,
        /// What is wrong.
        reason: String,
    },
}

/// A returned row could not be bound to the target record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    /// A non-optional field received a store null.
    #[error("column {column} (position {position}) is null but the field is not optional")]
    UnexpectedNull {
        /// Column name.
        column: String,
        /// Zero-based column position.
        position: usize,
    },

    /// The column holds a value of a different type.
    #[error("column {column} (position {position}): expected {expected}, found {found}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Zero-based column position.
        position: usize,
        /// Rust type the field expects.
        expected: &'static str,
        /// Type found in the row.
        found: SqlType,
    },

    /// The record reads more columns than the row has.
    #[error("row has {available} columns, record requested position {position}")]
    MissingColumn {
        /// Zero-based column position requested.
        position: usize,
        /// Number of columns in the row.
        available: usize,
    },
}

/// Errors surfaced by the bridge.
///
/// Inner layers propagate these with full detail; only the exception
/// boundary reduces them to a transport status.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Arguments did not match the call spec.
    #[error("marshaling defect: {0}")]
    Marshal(#[from] MarshalError),

    /// The backing store reported a fault.
    #[error("store fault in {operation}: {source}")]
    Store {
        /// Operation that failed.
        operation: String,
        /// The store's fault.
        #[source]
        source: StoreError,
    },

    /// An attempt exceeded its bounded wait.
    #[error("operation {operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// The configured wait.
        after: Duration,
    },

    /// A row did not match the target record.
    #[error("materialization failed: {0}")]
    Materialize(#[from] MaterializeError),

    /// No call spec is registered for the operation.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// The bridge itself failed, for example a row pump that panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Wraps a store fault raised while running `operation`.
    pub fn store(operation: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            operation: operation.into(),
            source,
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> FaultKind {
        match self {
            BridgeError::Marshal(_) => FaultKind::MarshalDefect,
            BridgeError::Store { source, .. } => source.kind,
            BridgeError::Timeout { .. } => FaultKind::DeadlineExceeded,
            BridgeError::Materialize(_) => FaultKind::ShapeMismatch,
            BridgeError::UnknownOperation(_) => FaultKind::UnknownOperation,
            BridgeError::Internal(_) => FaultKind::Unclassified,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(FaultKind::TransientUnavailable.is_retryable());
        assert!(FaultKind::DeadlineExceeded.is_retryable());
        assert!(FaultKind::TransientInternal.is_retryable());
        assert!(!FaultKind::BadArgument.is_retryable());
        assert!(!FaultKind::ConstraintViolation.is_retryable());
        assert!(!FaultKind::PermissionDenied.is_retryable());
        assert!(!FaultKind::MarshalDefect.is_retryable());
        assert!(!FaultKind::Unclassified.is_retryable());
    }

    #[test]
    fn bridge_error_classification() {
        let err = BridgeError::store("GetCase", StoreError::unavailable("connection reset"));
        assert_eq!(err.kind(), FaultKind::TransientUnavailable);
        assert!(err.is_retryable());

        let err = BridgeError::Timeout {
            operation: "GetCase".into(),
            after: Duration::from_secs(30),
        };
        assert!(err.is_retryable());

        let err = BridgeError::from(MarshalError::MissingArgument {
            operation: "GetCase".into(),
            name: "caseId".into(),
        });
        assert_eq!(err.kind(), FaultKind::MarshalDefect);
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display_keeps_store_message() {
        let err = BridgeError::store("InsertCaseLog", StoreError::bad_argument("caseId must be positive"));
        let msg = err.to_string();
        assert!(msg.contains("InsertCaseLog"));
        assert!(msg.contains("caseId must be positive"));
        assert_eq!(FaultKind::BadArgument.to_string(), "bad_argument");
    }
}
