//! In-memory procedure store.

use crate::error::{StoreError, StoreResult};
use crate::param::BoundParam;
use crate::store::{ProcedureCursor, ProcedureStore, ResultRow, StoreConnection};
use crate::types::{Direction, StoreValue};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The arguments a scripted procedure receives.
#[derive(Debug)]
pub struct ProcedureCall<'a> {
    procedure: &'a str,
    params: &'a [BoundParam],
}

impl<'a> ProcedureCall<'a> {
    /// Returns the procedure name.
    pub fn procedure(&self) -> &str {
        self.procedure
    }

    /// Returns all bound parameters.
    pub fn params(&self) -> &[BoundParam] {
        self.params
    }

    /// Returns a bound parameter by name.
    pub fn param(&self, name: &str) -> Option<&BoundParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Returns the bound value of a parameter, `Null` if it is not bound.
    pub fn value(&self, name: &str) -> &StoreValue {
        self.param(name).map_or(&StoreValue::Null, |p| &p.value)
    }
}

/// What a scripted procedure answers with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureResponse {
    /// Rows of the result set.
    pub rows: Vec<ResultRow>,
    /// Reported affected-row count.
    pub rows_affected: i64,
    /// Output parameter values by name.
    pub outputs: HashMap<String, StoreValue>,
}

impl ProcedureResponse {
    /// A response carrying only an affected-row count.
    pub fn affected(rows_affected: i64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    /// A response carrying a result set.
    pub fn rows(rows: Vec<ResultRow>) -> Self {
        Self {
            rows_affected: -1,
            rows,
            ..Self::default()
        }
    }

    /// Sets an output parameter value.
    pub fn with_output(mut self, name: impl Into<String>, value: StoreValue) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }
}

type ProcedureFn = dyn Fn(&ProcedureCall<'_>) -> StoreResult<ProcedureResponse> + Send + Sync;

/// Counters describing what the store has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Connections handed out.
    pub connections: u64,
    /// Procedure executions started.
    pub executions: u64,
    /// Output parameter reads.
    pub output_reads: u64,
    /// Cursors released, explicitly or by drop.
    pub cursors_closed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    executions: AtomicU64,
    output_reads: AtomicU64,
    cursors_closed: AtomicU64,
}

/// A procedure store whose procedures are Rust closures.
///
/// Suitable for:
/// - Unit and integration tests
/// - Running the bridge without a database
///
/// # Example
///
/// ```
/// use casebridge_core::{InMemoryStore, ProcedureResponse, StoreValue};
///
/// let store = InMemoryStore::new();
/// store.register("usp_Ping", |_call| {
///     Ok(ProcedureResponse::affected(0).with_output("returnValue", StoreValue::Int(0)))
/// });
/// assert!(store.has_procedure("usp_Ping"));
/// ```
#[derive(Default)]
pub struct InMemoryStore {
    procedures: Arc<RwLock<HashMap<String, Arc<ProcedureFn>>>>,
    counters: Arc<Counters>,
}

impl InMemoryStore {
    /// Creates a store with no procedures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a procedure.
    pub fn register<F>(&self, procedure: impl Into<String>, body: F)
    where
        F: Fn(&ProcedureCall<'_>) -> StoreResult<ProcedureResponse> + Send + Sync + 'static,
    {
        self.procedures
            .write()
            .insert(procedure.into(), Arc::new(body));
    }

    /// Returns true if the procedure is registered.
    pub fn has_procedure(&self, procedure: &str) -> bool {
        self.procedures.read().contains_key(procedure)
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            connections: self.counters.connections.load(Ordering::SeqCst),
            executions: self.counters.executions.load(Ordering::SeqCst),
            output_reads: self.counters.output_reads.load(Ordering::SeqCst),
            cursors_closed: self.counters.cursors_closed.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.procedures.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("InMemoryStore")
            .field("procedures", &names)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl ProcedureStore for InMemoryStore {
    async fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        self.counters.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            procedures: Arc::clone(&self.procedures),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MemoryConnection {
    procedures: Arc<RwLock<HashMap<String, Arc<ProcedureFn>>>>,
    counters: Arc<Counters>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn execute(
        &mut self,
        procedure: &str,
        params: &[BoundParam],
    ) -> StoreResult<Box<dyn ProcedureCursor>> {
        let body = self
            .procedures
            .read()
            .get(procedure)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("procedure {procedure} does not exist")))?;

        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        let response = body(&ProcedureCall { procedure, params })?;

        let mut outputs = HashMap::new();
        for param in params.iter().filter(|p| p.direction == Direction::Output) {
            let value = response
                .outputs
                .get(&param.name)
                .cloned()
                .unwrap_or(StoreValue::Null);
            outputs.insert(param.name.clone(), value);
        }

        Ok(Box::new(MemoryCursor {
            rows: response.rows.into(),
            rows_affected: response.rows_affected,
            outputs,
            exhausted: false,
            closed: false,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MemoryCursor {
    rows: VecDeque<ResultRow>,
    rows_affected: i64,
    outputs: HashMap<String, StoreValue>,
    exhausted: bool,
    closed: bool,
    counters: Arc<Counters>,
}

impl MemoryCursor {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.rows.clear();
            self.counters.cursors_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ProcedureCursor for MemoryCursor {
    async fn next_row(&mut self) -> StoreResult<Option<ResultRow>> {
        if self.closed {
            return Err(StoreError::unclassified("cursor is closed"));
        }
        let row = self.rows.pop_front();
        if row.is_none() {
            self.exhausted = true;
        }
        Ok(row)
    }

    fn rows_affected(&self) -> i64 {
        self.rows_affected
    }

    async fn read_output(&mut self, name: &str) -> StoreResult<StoreValue> {
        if !self.exhausted {
            return Err(StoreError::unclassified(
                "output parameters are not available until the result set is consumed",
            ));
        }
        self.counters.output_reads.fetch_add(1, Ordering::SeqCst);
        self.outputs
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::bad_argument(format!("{name} is not an output parameter")))
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.release();
    }
}
