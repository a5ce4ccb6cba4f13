use crate::error::FetchError;
use crate::model::{BatchKey, Instance, QueryFilter};
use crate::store::QuerySource;
use futures::future::BoxFuture;
use itertools::Itertools;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Waiter = oneshot::Sender<Result<Arc<Instance>, FetchError>>;

/// Keys requested since the last flush, in first-request order, with the
/// waiters attached to each.
#[derive(Default)]
struct PendingRequests {
    keys: Vec<BatchKey>,
    waiters: HashMap<BatchKey, Vec<Waiter>>,
}

impl PendingRequests {
    fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Outcome of one enqueued key, available once its batch completes.
pub struct PendingRecord {
    receiver: oneshot::Receiver<Result<Arc<Instance>, FetchError>>,
}

impl Future for PendingRecord {
    type Output = Result<Arc<Instance>, FetchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(FetchError::Dropped)))
    }
}

/// Groups "record with key X" requests into one filtered query per batch.
///
/// `flush` detaches the pending set before anything is awaited, so keys
/// enqueued while a batch is in flight always start a new batch.
pub struct QueryCoalescer {
    source: Arc<dyn QuerySource>,
    filter_name: String,
    filter_field_name: String,
    pending: Mutex<PendingRequests>,
}

impl QueryCoalescer {
    /// `filter_field_name` defaults to `filter_name`.
    pub fn new(source: Arc<dyn QuerySource>, filter_name: &str, filter_field_name: Option<&str>) -> Self {
        Self {
            source,
            filter_name: filter_name.to_string(),
            filter_field_name: filter_field_name.unwrap_or(filter_name).to_string(),
            pending: Mutex::new(PendingRequests::default()),
        }
    }

    pub fn enqueue(&self, key: BatchKey) -> PendingRecord {
        let (sender, receiver) = oneshot::channel();
        let mut pending = self.pending.lock();
        if !pending.waiters.contains_key(&key) {
            pending.keys.push(key.clone());
        }
        pending.waiters.entry(key).or_default().push(sender);
        PendingRecord { receiver }
    }

    pub fn pending_keys(&self) -> usize {
        self.pending.lock().keys.len()
    }

    /// Dispatch everything enqueued so far as one query.
    ///
    /// Fails with the query error when the query fails; every waiter of the
    /// batch gets the same error. Keys without a matching record resolve
    /// their waiters with `NotFound` and do not fail the flush.
    pub fn flush(&self) -> BoxFuture<'static, Result<(), FetchError>> {
        let batch = std::mem::take(&mut *self.pending.lock());
        let source = Arc::clone(&self.source);
        let filter_name = self.filter_name.clone();
        let filter_field_name = self.filter_field_name.clone();

        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            let PendingRequests { keys, mut waiters } = batch;
            let filter = QueryFilter::new()
                .param(&filter_name, keys.iter().join(","))
                .limit(keys.len());
            debug!(
                "Fetching {} keys from {} by {}",
                keys.len(),
                source.name(),
                filter_name
            );

            let records = match source.filter(&filter).items().await {
                Ok(records) => records,
                Err(e) => {
                    let error = FetchError::Batch {
                        source_name: source.name().to_string(),
                        error: Arc::new(e),
                    };
                    for sender in waiters.into_values().flatten() {
                        let _ = sender.send(Err(error.clone()));
                    }
                    return Err(error);
                }
            };

            for record in records {
                let Some(key) = record.key_value(&filter_field_name) else {
                    continue;
                };
                if let Some(senders) = waiters.remove(&key) {
                    for sender in senders {
                        let _ = sender.send(Ok(Arc::clone(&record)));
                    }
                }
            }

            for key in keys {
                let Some(senders) = waiters.remove(&key) else {
                    continue;
                };
                debug!("Key {} not found in {}", key, source.name());
                for sender in senders {
                    let _ = sender.send(Err(FetchError::NotFound {
                        key: key.clone(),
                        source_name: source.name().to_string(),
                    }));
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InnerData, ModelClass};
    use crate::store::MemoryQuerySource;
    use serde_json::{json, Value};

    fn record(value: Value) -> InnerData {
        match value {
            Value::Object(map) => map,
            _ => InnerData::new(),
        }
    }

    fn users() -> MemoryQuerySource {
        MemoryQuerySource::new(
            "users",
            Arc::new(ModelClass::empty("User")),
            vec![
                record(json!({"id": 1, "name": "Ann"})),
                record(json!({"id": 2, "name": "Bob"})),
                record(json!({"id": 4, "name": "Eve", "login": "eve"})),
            ],
        )
    }

    #[tokio::test]
    async fn test_same_key_is_sent_once() {
        let source = users();
        let coalescer = QueryCoalescer::new(Arc::new(source.clone()), "id", None);

        let waiters: Vec<PendingRecord> = (0..3).map(|_| coalescer.enqueue(BatchKey::Int(1))).collect();
        assert_eq!(coalescer.pending_keys(), 1);
        coalescer.flush().await.unwrap();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().inner_value("name"), Some(json!("Ann")));
        }
        let executed = source.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].get("id"), Some(&json!("1")));
        assert_eq!(executed[0].limit, Some(1));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let source = users();
        let coalescer = QueryCoalescer::new(Arc::new(source.clone()), "id", None);

        let one = coalescer.enqueue(BatchKey::Int(1));
        let two = coalescer.enqueue(BatchKey::Int(2));
        let three = coalescer.enqueue(BatchKey::Int(3));
        coalescer.flush().await.unwrap();

        assert!(one.await.is_ok());
        assert!(two.await.is_ok());
        match three.await {
            Err(FetchError::NotFound { key, .. }) => assert_eq!(key, BatchKey::Int(3)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(source.executed()[0].get("id"), Some(&json!("1,2,3")));
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let source = users();
        source.fail_with("boom");
        let coalescer = QueryCoalescer::new(Arc::new(source.clone()), "id", None);

        let waiters = vec![
            coalescer.enqueue(BatchKey::Int(1)),
            coalescer.enqueue(BatchKey::Int(1)),
            coalescer.enqueue(BatchKey::Int(2)),
        ];
        assert!(matches!(coalescer.flush().await, Err(FetchError::Batch { .. })));
        for waiter in waiters {
            match waiter.await {
                Err(FetchError::Batch { error, .. }) => assert!(error.to_string().contains("boom")),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_flush_swaps_before_awaiting() {
        let source = users();
        let coalescer = QueryCoalescer::new(Arc::new(source.clone()), "id", None);

        let first = coalescer.enqueue(BatchKey::Int(1));
        let in_flight = coalescer.flush();
        // nothing awaited yet, the pending set is already empty
        assert_eq!(coalescer.pending_keys(), 0);

        let again = coalescer.enqueue(BatchKey::Int(1));
        let second = coalescer.enqueue(BatchKey::Int(2));
        let next = coalescer.flush();

        in_flight.await.unwrap();
        next.await.unwrap();
        assert!(first.await.is_ok());
        assert!(again.await.is_ok());
        assert!(second.await.is_ok());

        let executed = source.executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0].get("id"), Some(&json!("1")));
        assert_eq!(executed[1].get("id"), Some(&json!("1,2")));
    }

    #[tokio::test]
    async fn test_empty_flush_sends_nothing() {
        let source = users();
        let coalescer = QueryCoalescer::new(Arc::new(source.clone()), "id", None);
        coalescer.flush().await.unwrap();
        assert_eq!(source.query_count(), 0);
    }

    #[tokio::test]
    async fn test_match_on_other_field() {
        let source = users();
        let coalescer = QueryCoalescer::new(Arc::new(source.clone()), "login", Some("login"));
        let eve = coalescer.enqueue(BatchKey::from("eve"));
        coalescer.flush().await.unwrap();
        assert_eq!(eve.await.unwrap().inner_value("id"), Some(json!(4)));
    }

    #[tokio::test]
    async fn test_dropped_batch() {
        let source = users();
        let coalescer = QueryCoalescer::new(Arc::new(source), "id", None);
        let orphan = coalescer.enqueue(BatchKey::Int(1));
        drop(coalescer.flush());
        assert!(matches!(orphan.await, Err(FetchError::Dropped)));
    }
}
