//! Caller identity resolution.
//!
//! The caller recorded in audit events comes from, in order: the
//! authenticated principal's id claim, its display-name claim, a
//! caller-supplied header, and finally `"anonymous"`. Empty values are
//! skipped. Resolution never fails: a lookup error or a panicking identity
//! source yields `"unknown"`.

use crate::error::IdentityError;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Claim carrying the authenticated principal's id.
pub const SUBJECT_CLAIM: &str = "sub";
/// Claim carrying the authenticated principal's display name.
pub const NAME_CLAIM: &str = "name";
/// Caller recorded when no identity is available.
pub const ANONYMOUS: &str = "anonymous";
/// Caller recorded when identity lookup itself failed.
pub const UNKNOWN: &str = "unknown";

/// Source of identity information for one inbound call.
pub trait CallerIdentity: Send + Sync {
    /// Returns a claim of the authenticated principal, if there is one.
    fn claim(&self, name: &str) -> Result<Option<String>, IdentityError>;

    /// Returns a request header value.
    fn header(&self, name: &str) -> Result<Option<String>, IdentityError>;
}

/// Identity information captured from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    claims: HashMap<String, String>,
    headers: HashMap<String, String>,
}

impl CallerContext {
    /// Creates an unauthenticated context with no headers.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Adds a principal claim.
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    /// Adds a header. Header names are case-insensitive.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }
}

impl CallerIdentity for CallerContext {
    fn claim(&self, name: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.claims.get(name).cloned())
    }

    fn header(&self, name: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.headers.get(&name.to_ascii_lowercase()).cloned())
    }
}

impl CallerIdentity for tonic::metadata::MetadataMap {
    fn claim(&self, _name: &str) -> Result<Option<String>, IdentityError> {
        Ok(None)
    }

    fn header(&self, name: &str) -> Result<Option<String>, IdentityError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .to_str()
                .map(|v| Some(v.to_string()))
                .map_err(|_| IdentityError::InvalidHeader(name.to_string())),
        }
    }
}

/// Resolves the caller to record for a call.
pub fn resolve_caller(identity: &dyn CallerIdentity, caller_header: &str) -> String {
    match catch_unwind(AssertUnwindSafe(|| lookup(identity, caller_header))) {
        Ok(Ok(Some(caller))) => caller,
        Ok(Ok(None)) => ANONYMOUS.to_string(),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "caller lookup failed");
            UNKNOWN.to_string()
        }
        Err(_) => {
            tracing::warn!("caller lookup panicked");
            UNKNOWN.to_string()
        }
    }
}

fn lookup(
    identity: &dyn CallerIdentity,
    caller_header: &str,
) -> Result<Option<String>, IdentityError> {
    for claim in [SUBJECT_CLAIM, NAME_CLAIM] {
        if let Some(value) = non_empty(identity.claim(claim)?) {
            return Ok(Some(value));
        }
    }
    Ok(non_empty(identity.header(caller_header)?))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
