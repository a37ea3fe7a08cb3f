//! Backing store abstraction.
//!
//! The bridge talks to the relational store through three traits:
//!
//! - [`ProcedureStore`] hands out connections.
//! - [`StoreConnection`] executes one named procedure at a time. `execute`
//!   takes `&mut self`, so a connection can never have two calls in flight.
//! - [`ProcedureCursor`] yields result rows and, once the rows are consumed,
//!   the values of output parameters.
//!
//! # Invariants
//!
//! - Output parameters are only readable after `next_row` has returned
//!   `Ok(None)`.
//! - Dropping a cursor releases it; `close` releases it eagerly.
//!
//! # Implementors
//!
//! - [`crate::InMemoryStore`] for tests and local runs

use crate::error::StoreResult;
use crate::param::BoundParam;
use crate::types::StoreValue;
use async_trait::async_trait;

/// One returned row: column names with raw values, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    columns: Vec<(String, StoreValue)>,
}

impl ResultRow {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column.
    pub fn with(mut self, name: impl Into<String>, value: StoreValue) -> Self {
        self.columns.push((name.into(), value));
        self
    }

    /// Returns the value of the named column.
    pub fn get(&self, name: &str) -> Option<&StoreValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Returns the column at `position` with its name.
    pub fn column(&self, position: usize) -> Option<(&str, &StoreValue)> {
        self.columns
            .get(position)
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Iterates over columns in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoreValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, StoreValue)> for ResultRow {
    fn from_iter<I: IntoIterator<Item = (K, StoreValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// A source of store connections.
#[async_trait]
pub trait ProcedureStore: Send + Sync {
    /// Opens (or checks out) a connection.
    async fn connect(&self) -> StoreResult<Box<dyn StoreConnection>>;
}

/// A single connection to the store.
#[async_trait]
pub trait StoreConnection: Send {
    /// Executes `procedure` with the bound parameters.
    async fn execute(
        &mut self,
        procedure: &str,
        params: &[BoundParam],
    ) -> StoreResult<Box<dyn ProcedureCursor>>;
}

/// The open result of one procedure execution.
#[async_trait]
pub trait ProcedureCursor: Send {
    /// Returns the next row, or `None` when the result set is exhausted.
    async fn next_row(&mut self) -> StoreResult<Option<ResultRow>>;

    /// Returns the count of rows affected by the procedure.
    fn rows_affected(&self) -> i64;

    /// Reads an output parameter. Only valid after the rows are exhausted.
    async fn read_output(&mut self, name: &str) -> StoreResult<StoreValue>;

    /// Releases the cursor.
    async fn close(&mut self) -> StoreResult<()>;
}
