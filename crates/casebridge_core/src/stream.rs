//! Server-streaming record delivery.
//!
//! A [`RecordStream`] is fed by a pump task that owns the open cursor. Rows
//! are materialized one at a time and handed over through a bounded channel,
//! so the cursor only advances as fast as the consumer reads. Dropping the
//! stream closes the channel; the pump notices before fetching the next row
//! and closes the cursor.
//!
//! The stream ends after the first error. A panic while producing a row
//! surfaces as a final internal error, never as an early end. Output
//! parameters are read once the rows are exhausted and become available
//! through [`RecordStream::outputs`] when the stream has yielded its last
//! item.

use crate::callspec::CallSpec;
use crate::error::{BridgeError, BridgeResult};
use crate::invoker::{read_outputs, OpenCall, OutputValues};
use crate::materialize::{materialize, FromRow};
use futures::{FutureExt, Stream};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// A stream of typed records from one procedure call.
#[derive(Debug)]
pub struct RecordStream<T> {
    operation: String,
    rows: mpsc::Receiver<BridgeResult<T>>,
    pending_outputs: Option<oneshot::Receiver<OutputValues>>,
    outputs: Option<OutputValues>,
}

impl<T: FromRow + Send + 'static> RecordStream<T> {
    /// Starts pumping rows from `call` on a background task.
    pub(crate) fn spawn(spec: Arc<CallSpec>, call: OpenCall, buffer: usize) -> Self {
        let (tx, rows) = mpsc::channel(buffer.max(1));
        let (outputs_tx, pending_outputs) = oneshot::channel();
        let operation = spec.operation().to_string();

        tokio::spawn(guarded_pump::<T>(spec, call, tx, outputs_tx));

        Self {
            operation,
            rows,
            pending_outputs: Some(pending_outputs),
            outputs: None,
        }
    }
}

impl<T> RecordStream<T> {
    /// Returns the operation this stream belongs to.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Returns the output parameters once the stream is fully drained.
    ///
    /// Returns `None` while rows are still pending, and for streams that
    /// ended with an error.
    pub fn outputs(&mut self) -> Option<&OutputValues> {
        if let Some(pending) = self.pending_outputs.as_mut() {
            match pending.try_recv() {
                Ok(outputs) => {
                    self.outputs = Some(outputs);
                    self.pending_outputs = None;
                }
                Err(oneshot::error::TryRecvError::Closed) => self.pending_outputs = None,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.outputs.as_ref()
    }
}

impl<T> Stream for RecordStream<T> {
    type Item = BridgeResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rows.poll_recv(cx)
    }
}

/// Runs [`pump`], turning a panic into a final `Internal` error item so the
/// consumer never mistakes it for a clean drain.
async fn guarded_pump<T: FromRow>(
    spec: Arc<CallSpec>,
    call: OpenCall,
    tx: mpsc::Sender<BridgeResult<T>>,
    outputs_tx: oneshot::Sender<OutputValues>,
) {
    let operation = spec.operation().to_string();
    let on_panic = tx.clone();

    if let Err(payload) = AssertUnwindSafe(pump::<T>(spec, call, tx, outputs_tx))
        .catch_unwind()
        .await
    {
        let detail = panic_detail(payload.as_ref());
        tracing::error!(operation = %operation, panic = %detail, "row pump panicked");
        let _ = on_panic
            .send(Err(BridgeError::Internal(format!(
                "row pump for {operation} panicked: {detail}"
            ))))
            .await;
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

async fn pump<T: FromRow>(
    spec: Arc<CallSpec>,
    mut call: OpenCall,
    tx: mpsc::Sender<BridgeResult<T>>,
    outputs_tx: oneshot::Sender<OutputValues>,
) {
    let operation = spec.operation();
    let mut delivered = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => None,
            row = call.cursor().next_row() => Some(row),
        };

        let item = match next {
            None => {
                tracing::debug!(operation, delivered, "stream consumer went away");
                close(&mut call, operation).await;
                return;
            }
            Some(Ok(None)) => break,
            Some(Ok(Some(row))) => materialize::<T>(&row).map_err(BridgeError::from),
            Some(Err(e)) => Err(BridgeError::store(operation, e)),
        };

        let failed = item.is_err();
        if tx.send(item).await.is_err() {
            tracing::debug!(operation, delivered, "stream consumer went away");
            close(&mut call, operation).await;
            return;
        }
        if failed {
            close(&mut call, operation).await;
            return;
        }
        delivered += 1;
    }

    let outputs = read_outputs(call.cursor(), &spec).await;
    close(&mut call, operation).await;

    match outputs {
        Ok(outputs) => {
            tracing::debug!(operation, delivered, "stream drained");
            let _ = outputs_tx.send(outputs);
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
        }
    }
}

async fn close(call: &mut OpenCall, operation: &str) {
    if let Err(e) = call.cursor().close().await {
        tracing::debug!(operation, error = %e, "cursor close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callspec::ParamSpec;
    use crate::invoker::ProcedureInvoker;
    use crate::memory::{InMemoryStore, ProcedureResponse};
    use crate::store::ResultRow;
    use crate::types::{SqlType, StoreValue};
    use futures::StreamExt;
    use std::time::Duration;

    fn spec() -> Arc<CallSpec> {
        Arc::new(
            CallSpec::query("GetCaseNotes", "usp_GetCaseNotes")
                .param(ParamSpec::output("total", SqlType::Int)),
        )
    }

    fn store_with_rows(n: i64) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.register("usp_GetCaseNotes", move |_| {
            let rows = (1..=n)
                .map(|i| ResultRow::new().with("noteId", StoreValue::BigInt(i)))
                .collect();
            Ok(ProcedureResponse::rows(rows).with_output("total", StoreValue::Int(n as i32)))
        });
        store
    }

    async fn open(store: &Arc<InMemoryStore>, spec: &CallSpec) -> OpenCall {
        let params = crate::param::marshal(spec, &crate::param::Args::new()).unwrap();
        ProcedureInvoker::new(store.clone(), Duration::from_secs(5))
            .open(spec, &params)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn drains_rows_then_exposes_outputs() {
        let store = store_with_rows(3);
        let spec = spec();
        let call = open(&store, &spec).await;
        let mut stream: RecordStream<ResultRow> = RecordStream::spawn(spec, call, 1);

        let mut seen = 0;
        while let Some(row) = stream.next().await {
            row.unwrap();
            seen += 1;
        }

        assert_eq!(seen, 3);
        assert_eq!(
            stream.outputs().and_then(|o| o.get("total")),
            Some(&StoreValue::Int(3))
        );
        assert_eq!(store.stats().output_reads, 1);
        assert_eq!(store.stats().cursors_closed, 1);
    }

    #[tokio::test]
    async fn dropping_the_stream_closes_the_cursor() {
        let store = store_with_rows(100);
        let spec = spec();
        let call = open(&store, &spec).await;
        let mut stream: RecordStream<ResultRow> = RecordStream::spawn(spec, call, 2);

        assert!(stream.next().await.is_some());
        drop(stream);

        for _ in 0..100 {
            if store.stats().cursors_closed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(store.stats().cursors_closed, 1);
        assert_eq!(store.stats().output_reads, 0);
    }

    #[tokio::test]
    async fn shape_mismatch_ends_the_stream() {
        #[derive(Debug)]
        struct Note {
            _id: String,
        }
        impl FromRow for Note {
            fn from_row(row: &mut crate::materialize::RowReader<'_>) -> crate::MaterializeResult<Self> {
                Ok(Self { _id: row.next()? })
            }
        }

        let store = store_with_rows(5);
        let spec = spec();
        let call = open(&store, &spec).await;
        let mut stream: RecordStream<Note> = RecordStream::spawn(spec, call, 4);

        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap_err().kind(), crate::FaultKind::ShapeMismatch);
        assert!(stream.next().await.is_none());
        assert!(stream.outputs().is_none());
    }

    #[tokio::test]
    async fn panicking_record_ends_with_internal_error() {
        #[derive(Debug)]
        struct Note {
            id: i64,
        }
        impl FromRow for Note {
            fn from_row(row: &mut crate::materialize::RowReader<'_>) -> crate::MaterializeResult<Self> {
                let id: i64 = row.next()?;
                if id == 2 {
                    panic!("note {id} cannot be decoded");
                }
                Ok(Self { id })
            }
        }

        let store = store_with_rows(5);
        let spec = spec();
        let call = open(&store, &spec).await;
        let mut stream: RecordStream<Note> = RecordStream::spawn(spec, call, 4);

        assert_eq!(stream.next().await.unwrap().unwrap().id, 1);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Internal(_)));
        assert_eq!(err.kind(), crate::FaultKind::Unclassified);
        assert!(err.to_string().contains("note 2 cannot be decoded"));
        assert!(stream.next().await.is_none());
        assert!(stream.outputs().is_none());
    }
}
