//! Operation dispatch.
//!
//! A [`DispatchTable`] maps operation names to validated call
//! specs. [`Bridge`] is the single generic entry point that marshals
//! arguments, runs the procedure under the resilience policy, and
//! materializes the result.

use crate::callspec::CallSpec;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, MarshalError, MarshalResult};
use crate::invoker::{InvocationResult, OutputValues, ProcedureInvoker};
use crate::materialize::{FromRow, Records};
use crate::param::{marshal, Args};
use crate::retry::{RetryObserver, RetryPolicy};
use crate::store::ProcedureStore;
use crate::stream::RecordStream;
use crate::types::StoreValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Call specs keyed by operation name.
#[derive(Debug, Default, Clone)]
pub struct DispatchTable {
    specs: HashMap<String, Arc<CallSpec>>,
}

impl DispatchTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a call spec.
    ///
    /// Fails if the call spec is malformed or its operation is already
    /// registered.
    pub fn register(&mut self, spec: CallSpec) -> MarshalResult<()> {
        spec.validate()?;
        if self.specs.contains_key(spec.operation()) {
            return Err(MarshalError::InvalidSpec {
                operation: spec.operation().to_string(),
                reason: "operation is already registered".into(),
            });
        }
        self.specs
            .insert(spec.operation().to_string(), Arc::new(spec));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, spec: CallSpec) -> MarshalResult<Self> {
        self.register(spec)?;
        Ok(self)
    }

    /// Returns the call spec for `operation`.
    pub fn get(&self, operation: &str) -> BridgeResult<Arc<CallSpec>> {
        self.specs
            .get(operation)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownOperation(operation.to_string()))
    }

    /// Returns true if `operation` is registered.
    pub fn contains(&self, operation: &str) -> bool {
        self.specs.contains_key(operation)
    }

    /// Returns the registered operation names, sorted.
    pub fn operations(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered operations.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// The typed result of a unary call.
#[derive(Debug)]
pub enum CallResult<T> {
    /// Affected-row count of a non-query procedure.
    RowsAffected(i64),
    /// Lazily materialized records of a query procedure.
    Records(Records<T>),
}

/// A completed unary call.
#[derive(Debug)]
pub struct CallOutcome<T> {
    /// Row count or records.
    pub result: CallResult<T>,
    /// Output parameters.
    pub outputs: OutputValues,
}

impl<T> CallOutcome<T> {
    /// Returns the affected-row count, if the operation reports one.
    pub fn rows_affected(&self) -> Option<i64> {
        match self.result {
            CallResult::RowsAffected(n) => Some(n),
            CallResult::Records(_) => None,
        }
    }

    /// Returns the records, if the operation returns a row set.
    pub fn into_records(self) -> Option<Records<T>> {
        match self.result {
            CallResult::Records(records) => Some(records),
            CallResult::RowsAffected(_) => None,
        }
    }

    /// Returns the value of an output parameter.
    pub fn output(&self, name: &str) -> Option<&StoreValue> {
        self.outputs.get(name)
    }
}

/// Generic entry point for every operation in a dispatch table.
///
/// Cheap to clone; clones share the table and the store.
#[derive(Debug, Clone)]
pub struct Bridge {
    table: Arc<DispatchTable>,
    invoker: ProcedureInvoker,
    policy: RetryPolicy,
    config: Arc<BridgeConfig>,
}

impl Bridge {
    /// Creates a bridge over `store`.
    pub fn new(table: DispatchTable, store: Arc<dyn ProcedureStore>, config: BridgeConfig) -> Self {
        Self {
            table: Arc::new(table),
            invoker: ProcedureInvoker::new(store, config.call_timeout),
            policy: RetryPolicy::new(config.retry.clone()),
            config: Arc::new(config),
        }
    }

    /// Replaces the retry observer.
    pub fn with_retry_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.policy = self.policy.with_observer(observer);
        self
    }

    /// Returns the dispatch table.
    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Runs `operation` to completion.
    ///
    /// Arguments are marshaled once, before the first attempt, so a
    /// marshaling defect never reaches the store and is never retried.
    pub async fn invoke<T: FromRow>(
        &self,
        operation: &str,
        args: &Args,
    ) -> BridgeResult<CallOutcome<T>> {
        let spec = self.table.get(operation)?;
        let params = marshal(&spec, args)?;

        let invoker = &self.invoker;
        let spec_ref: &CallSpec = &spec;
        let params_ref = params.as_slice();
        let invocation = self
            .policy
            .run(operation, move |_| invoker.execute(spec_ref, params_ref))
            .await?;

        let result = match invocation.result {
            InvocationResult::RowsAffected(n) => CallResult::RowsAffected(n),
            InvocationResult::RowSet(rows) => CallResult::Records(Records::new(rows)),
        };
        Ok(CallOutcome {
            result,
            outputs: invocation.outputs,
        })
    }

    /// Starts `operation` as a server stream.
    ///
    /// Retries cover opening the cursor only; once rows flow, faults end the
    /// stream.
    pub async fn stream<T: FromRow + Send + 'static>(
        &self,
        operation: &str,
        args: &Args,
    ) -> BridgeResult<RecordStream<T>> {
        let spec = self.table.get(operation)?;
        let params = marshal(&spec, args)?;

        let invoker = &self.invoker;
        let spec_ref: &CallSpec = &spec;
        let params_ref = params.as_slice();
        let call = self
            .policy
            .run(operation, move |_| invoker.open(spec_ref, params_ref))
            .await?;

        Ok(RecordStream::spawn(
            Arc::clone(&spec),
            call,
            self.config.stream_buffer,
        ))
    }
}
