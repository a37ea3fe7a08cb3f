//! Procedure invocation.

use crate::callspec::{CallSpec, ResultShape};
use crate::error::{BridgeError, BridgeResult};
use crate::param::BoundParam;
use crate::store::{ProcedureCursor, ProcedureStore, ResultRow, StoreConnection};
use crate::types::StoreValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Output parameter values, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputValues {
    values: Vec<(String, StoreValue)>,
}

impl OutputValues {
    /// Returns the value of the named output parameter.
    pub fn get(&self, name: &str) -> Option<&StoreValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Iterates over outputs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoreValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Returns the number of outputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the operation declares no outputs.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What one execution produced.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    /// Affected-row count of a non-query procedure.
    RowsAffected(i64),
    /// Rows of a query procedure.
    RowSet(Vec<ResultRow>),
}

/// A completed execution: its result plus the output parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Row count or row set.
    pub result: InvocationResult,
    /// Output parameters, read after the rows were consumed.
    pub outputs: OutputValues,
}

/// An execution whose rows have not been consumed yet.
///
/// Holds the connection and cursor open until it is dropped or closed.
pub struct OpenCall {
    // Kept alive for as long as the cursor is.
    _connection: Box<dyn StoreConnection>,
    cursor: Box<dyn ProcedureCursor>,
}

impl OpenCall {
    /// Returns the cursor.
    pub fn cursor(&mut self) -> &mut dyn ProcedureCursor {
        self.cursor.as_mut()
    }
}

impl std::fmt::Debug for OpenCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenCall").finish_non_exhaustive()
    }
}

/// Executes call specs against a store.
///
/// Every attempt checks out its own connection, so concurrent calls never
/// share one. Each attempt is bounded by `call_timeout`; when the wait runs
/// out the attempt is abandoned, dropping its cursor, and reported as
/// [`BridgeError::Timeout`].
#[derive(Clone)]
pub struct ProcedureInvoker {
    store: Arc<dyn ProcedureStore>,
    call_timeout: Duration,
}

impl ProcedureInvoker {
    /// Creates an invoker.
    pub fn new(store: Arc<dyn ProcedureStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    /// Returns the per-attempt timeout.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Executes `spec` and consumes its result.
    ///
    /// Rows are drained first; then every declared output parameter is read
    /// exactly once, whether the procedure returned rows, no rows, or a
    /// non-success row count.
    pub async fn execute(&self, spec: &CallSpec, params: &[BoundParam]) -> BridgeResult<Invocation> {
        self.bounded(spec, self.execute_unbounded(spec, params)).await
    }

    /// Starts `spec` and returns its cursor without consuming rows.
    ///
    /// Only opening the cursor counts against the timeout; rows are pulled at
    /// the consumer's pace afterwards.
    pub async fn open(&self, spec: &CallSpec, params: &[BoundParam]) -> BridgeResult<OpenCall> {
        self.bounded(spec, self.open_unbounded(spec, params)).await
    }

    async fn bounded<T>(
        &self,
        spec: &CallSpec,
        attempt: impl Future<Output = BridgeResult<T>>,
    ) -> BridgeResult<T> {
        match tokio::time::timeout(self.call_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout {
                operation: spec.operation().to_string(),
                after: self.call_timeout,
            }),
        }
    }

    async fn open_unbounded(&self, spec: &CallSpec, params: &[BoundParam]) -> BridgeResult<OpenCall> {
        let operation = spec.operation();
        let mut connection = self
            .store
            .connect()
            .await
            .map_err(|e| BridgeError::store(operation, e))?;

        tracing::trace!(
            operation,
            procedure = spec.procedure(),
            params = params.len(),
            "executing procedure"
        );

        let cursor = connection
            .execute(spec.procedure(), params)
            .await
            .map_err(|e| BridgeError::store(operation, e))?;

        Ok(OpenCall {
            _connection: connection,
            cursor,
        })
    }

    async fn execute_unbounded(
        &self,
        spec: &CallSpec,
        params: &[BoundParam],
    ) -> BridgeResult<Invocation> {
        let operation = spec.operation();
        let mut call = self.open_unbounded(spec, params).await?;
        let cursor = call.cursor();

        let mut rows = Vec::new();
        while let Some(row) = cursor
            .next_row()
            .await
            .map_err(|e| BridgeError::store(operation, e))?
        {
            if spec.shape() == ResultShape::Rows {
                rows.push(row);
            }
        }

        let result = match spec.shape() {
            ResultShape::RowsAffected => InvocationResult::RowsAffected(cursor.rows_affected()),
            ResultShape::Rows => InvocationResult::RowSet(rows),
        };

        let outputs = read_outputs(cursor, spec).await?;

        cursor
            .close()
            .await
            .map_err(|e| BridgeError::store(operation, e))?;

        tracing::debug!(
            operation,
            rows = match &result {
                InvocationResult::RowSet(rows) => rows.len() as i64,
                InvocationResult::RowsAffected(n) => *n,
            },
            outputs = outputs.len(),
            "procedure completed"
        );

        Ok(Invocation { result, outputs })
    }
}

impl std::fmt::Debug for ProcedureInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureInvoker")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

/// Reads every declared output parameter once, in declaration order.
///
/// Must only be called after the cursor's rows are exhausted.
pub(crate) async fn read_outputs(
    cursor: &mut dyn ProcedureCursor,
    spec: &CallSpec,
) -> BridgeResult<OutputValues> {
    let mut values = Vec::new();
    for param in spec.outputs() {
        let value = cursor
            .read_output(&param.name)
            .await
            .map_err(|e| BridgeError::store(spec.operation(), e))?;
        values.push((param.name.clone(), value));
    }
    Ok(OutputValues { values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callspec::ParamSpec;
    use crate::error::{FaultKind, StoreError};
    use crate::memory::{InMemoryStore, ProcedureResponse};
    use crate::param::{marshal, Args};
    use crate::types::SqlType;

    fn list_notes() -> CallSpec {
        CallSpec::query("GetCaseNotes", "usp_GetCaseNotes")
            .param(ParamSpec::input("caseId", SqlType::Int))
            .param(ParamSpec::output("total", SqlType::Int))
            .param(ParamSpec::output("returnValue", SqlType::Int))
    }

    fn invoker(store: &Arc<InMemoryStore>) -> ProcedureInvoker {
        ProcedureInvoker::new(store.clone(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn reads_each_output_once_for_empty_row_set() {
        let store = Arc::new(InMemoryStore::new());
        store.register("usp_GetCaseNotes", |_| {
            Ok(ProcedureResponse::rows(vec![])
                .with_output("total", StoreValue::Int(0))
                .with_output("returnValue", StoreValue::Int(0)))
        });

        let spec = list_notes();
        let params = marshal(&spec, &Args::new().value("caseId", 7i32)).unwrap();
        let invocation = invoker(&store).execute(&spec, &params).await.unwrap();

        assert_eq!(invocation.result, InvocationResult::RowSet(vec![]));
        assert_eq!(invocation.outputs.len(), 2);
        assert_eq!(invocation.outputs.get("total"), Some(&StoreValue::Int(0)));
        assert_eq!(store.stats().output_reads, 2);
        assert_eq!(store.stats().cursors_closed, 1);
    }

    #[tokio::test]
    async fn reads_outputs_after_rows() {
        let store = Arc::new(InMemoryStore::new());
        store.register("usp_GetCaseNotes", |_| {
            let rows = (1..=3)
                .map(|n| ResultRow::new().with("noteId", StoreValue::BigInt(n)))
                .collect();
            Ok(ProcedureResponse::rows(rows).with_output("total", StoreValue::Int(3)))
        });

        let spec = list_notes();
        let params = marshal(&spec, &Args::new().value("caseId", 7i32)).unwrap();
        let invocation = invoker(&store).execute(&spec, &params).await.unwrap();

        match invocation.result {
            InvocationResult::RowSet(rows) => assert_eq!(rows.len(), 3),
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(invocation.outputs.get("total"), Some(&StoreValue::Int(3)));
        assert_eq!(invocation.outputs.get("returnValue"), Some(&StoreValue::Null));
    }

    #[tokio::test]
    async fn non_query_reports_row_count_and_outputs() {
        let store = Arc::new(InMemoryStore::new());
        store.register("usp_CloseCase", |_| {
            Ok(ProcedureResponse::affected(0).with_output("returnValue", StoreValue::Int(-1)))
        });

        let spec = CallSpec::non_query("CloseCase", "usp_CloseCase")
            .param(ParamSpec::output("returnValue", SqlType::Int));
        let invocation = invoker(&store).execute(&spec, &[]).await.unwrap();

        assert_eq!(invocation.result, InvocationResult::RowsAffected(0));
        assert_eq!(invocation.outputs.get("returnValue"), Some(&StoreValue::Int(-1)));
    }

    #[tokio::test]
    async fn store_fault_keeps_its_kind() {
        let store = Arc::new(InMemoryStore::new());
        store.register("usp_CloseCase", |_| Err(StoreError::constraint("FK_CaseLog_Case")));

        let spec = CallSpec::non_query("CloseCase", "usp_CloseCase");
        let err = invoker(&store).execute(&spec, &[]).await.unwrap_err();
        assert_eq!(err.kind(), FaultKind::ConstraintViolation);
        assert!(err.to_string().contains("FK_CaseLog_Case"));
    }

    struct StalledStore;

    #[async_trait::async_trait]
    impl ProcedureStore for StalledStore {
        async fn connect(&self) -> crate::error::StoreResult<Box<dyn StoreConnection>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn exceeding_the_wait_is_a_retryable_timeout() {
        let invoker = ProcedureInvoker::new(Arc::new(StalledStore), Duration::from_millis(10));
        let spec = CallSpec::non_query("CloseCase", "usp_CloseCase");

        let err = invoker.execute(&spec, &[]).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
        assert!(err.is_retryable());
    }
}
