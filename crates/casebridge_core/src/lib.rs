//! # Casebridge Core
//!
//! Typed bridge from case-management operations to named store procedures.
//!
//! This crate provides:
//! - Declarative call specs and a dispatch table keyed by operation
//! - Parameter marshaling with typed nulls and size checks
//! - Procedure invocation with bounded waits and out-parameter reads
//! - Lazy materialization of rows into typed records
//! - A retry policy with capped exponential backoff
//! - Server-streaming record delivery with prompt cursor release
//! - An in-memory procedure store for tests and local runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use casebridge_core::{Args, Bridge, BridgeConfig, CallSpec, DispatchTable, ParamSpec, SqlType};
//!
//! let table = DispatchTable::new().with(
//!     CallSpec::non_query("InsertCaseLog", "usp_InsertCaseLog")
//!         .param(ParamSpec::input("logId", SqlType::Int))
//!         .param(ParamSpec::output("returnValue", SqlType::Int)),
//! )?;
//! let bridge = Bridge::new(table, store, BridgeConfig::default());
//!
//! let outcome = bridge
//!     .invoke::<ResultRow>("InsertCaseLog", &Args::new().absent::<i32>("logId"))
//!     .await?;
//! println!("{:?}", outcome.output("returnValue"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod callspec;
mod config;
mod dispatch;
mod error;
mod invoker;
mod materialize;
mod memory;
mod param;
mod retry;
mod store;
mod stream;
mod types;

pub use callspec::{CallSpec, ParamSpec, ResultShape};
pub use config::{BridgeConfig, RetryConfig};
pub use dispatch::{Bridge, CallOutcome, CallResult, DispatchTable};
pub use error::{
    BridgeError, BridgeResult, FaultKind, MarshalError, MarshalResult, MaterializeError,
    MaterializeResult, StoreError, StoreResult,
};
pub use invoker::{Invocation, InvocationResult, OpenCall, OutputValues, ProcedureInvoker};
pub use materialize::{materialize, FromRow, FromStoreValue, Records, RowReader};
pub use memory::{InMemoryStore, ProcedureCall, ProcedureResponse, StoreStats};
pub use param::{marshal, Arg, Args, BoundParam, ParamValue, SqlParam};
pub use retry::{
    RetryContext, RetryEvent, RetryObserver, RetryPolicy, RetryState, TracingRetryObserver,
};
pub use store::{ProcedureCursor, ProcedureStore, ResultRow, StoreConnection};
pub use stream::RecordStream;
pub use types::{Direction, Encoding, ParamSize, SqlType, StoreValue};
