use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;

use super::{EventSource, SourceMessage};
use crate::cache::OrderCache;
use crate::db::OrderStore;
use crate::models::Order;

/// Why processing of a single event stopped short of the cache publish.
#[derive(Debug, Error)]
pub enum IngestError {
  /// Undecodable payload. Non-retryable: the event is acked and dropped.
  #[error("malformed event payload: {0}")]
  Malformed(#[from] serde_json::Error),
  /// Decoded fine but carries no order identifier. Acked and dropped.
  #[error("event is missing an order_uid")]
  MissingId,
  /// The durable write never succeeded within the attempt budget. The event
  /// is left uncommitted and the source redelivers it later.
  #[error("persist failed after {attempts} attempts: {source}")]
  RetriesExhausted {
    attempts: u32,
    #[source]
    source: anyhow::Error,
  },
  /// Shutdown interrupted a backoff wait; the event stays uncommitted.
  #[error("shutdown interrupted a retry wait")]
  Cancelled,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  /// First inter-attempt wait; doubled after every failed attempt.
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay: Duration::from_secs(1),
    }
  }
}

/// Sequential change-event consumer.
///
/// One message is fully processed before the next fetch: decode, validate,
/// persist with bounded exponential backoff, publish to the cache, commit.
/// The cache is only ever updated after the durable write, so it never
/// reflects a value the store does not hold.
pub struct Ingestor {
  source: Arc<dyn EventSource>,
  store: Arc<dyn OrderStore>,
  cache: Arc<OrderCache>,
  retry: RetryPolicy,
}

impl Ingestor {
  pub fn new(
    source: Arc<dyn EventSource>,
    store: Arc<dyn OrderStore>,
    cache: Arc<OrderCache>,
    retry: RetryPolicy,
  ) -> Self {
    Self {
      source,
      store,
      cache,
      retry,
    }
  }

  pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
    tracing::info!("event consumer started");
    loop {
      let message = tokio::select! {
        _ = shutdown.recv() => break,
        fetched = self.source.fetch() => match fetched {
          Ok(message) => message,
          Err(e) => {
            tracing::error!(error = %e, "failed to fetch event");
            continue;
          }
        },
      };

      match self.process(&message, &mut shutdown).await {
        Ok(order_uid) => {
          tracing::info!(offset = message.offset, %order_uid, "order persisted and cached");
          self.commit(&message).await;
        }
        Err(err @ (IngestError::Malformed(_) | IngestError::MissingId)) => {
          tracing::warn!(offset = message.offset, error = %err, "dropping undeliverable event");
          self.commit(&message).await;
        }
        Err(IngestError::RetriesExhausted { attempts, source }) => {
          tracing::error!(
            offset = message.offset,
            attempts,
            error = %source,
            "order not persisted, leaving event uncommitted for redelivery"
          );
        }
        Err(IngestError::Cancelled) => {
          tracing::info!(
            offset = message.offset,
            "shutdown during persist, event left uncommitted"
          );
          break;
        }
      }
    }
    tracing::info!("event consumer stopped");
  }

  async fn process(
    &self,
    message: &SourceMessage,
    shutdown: &mut broadcast::Receiver<()>,
  ) -> Result<String, IngestError> {
    let order: Order = serde_json::from_slice(&message.payload)?;
    if order.order_uid.trim().is_empty() {
      return Err(IngestError::MissingId);
    }

    self.persist_with_retry(&order, shutdown).await?;

    // Only after the durable write; the cache must never get ahead of the
    // store.
    self.cache.set(order.order_uid.clone(), order.clone());
    Ok(order.order_uid)
  }

  async fn persist_with_retry(
    &self,
    order: &Order,
    shutdown: &mut broadcast::Receiver<()>,
  ) -> Result<(), IngestError> {
    let mut delay = self.retry.base_delay;
    let mut attempt = 0;
    loop {
      attempt += 1;
      match self.store.save_order(order).await {
        Ok(()) => return Ok(()),
        Err(e) => {
          tracing::warn!(
            order_uid = %order.order_uid,
            attempt,
            max_attempts = self.retry.max_attempts,
            error = %e,
            "order persist attempt failed"
          );
          if attempt >= self.retry.max_attempts {
            return Err(IngestError::RetriesExhausted {
              attempts: attempt,
              source: e,
            });
          }
        }
      }

      tokio::select! {
        _ = tokio::time::sleep(delay) => delay *= 2,
        _ = shutdown.recv() => return Err(IngestError::Cancelled),
      }
    }
  }

  async fn commit(&self, message: &SourceMessage) {
    if let Err(e) = self.source.ack(message).await {
      tracing::error!(offset = message.offset, error = %e, "failed to commit event offset");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::bail;
  use async_trait::async_trait;
  use parking_lot::Mutex;
  use std::collections::{HashMap, VecDeque};
  use std::time::Instant;

  struct MockStore {
    orders: Mutex<HashMap<String, Order>>,
    saves: Mutex<u32>,
    fail_times: Mutex<u32>,
  }

  impl MockStore {
    fn new(fail_times: u32) -> Arc<Self> {
      Arc::new(Self {
        orders: Mutex::new(HashMap::new()),
        saves: Mutex::new(0),
        fail_times: Mutex::new(fail_times),
      })
    }

    fn saves(&self) -> u32 {
      *self.saves.lock()
    }
  }

  #[async_trait]
  impl OrderStore for MockStore {
    async fn ensure_schema(&self) -> Result<(), anyhow::Error> {
      Ok(())
    }

    async fn save_order(&self, order: &Order) -> Result<(), anyhow::Error> {
      *self.saves.lock() += 1;
      {
        let mut fail = self.fail_times.lock();
        if *fail > 0 {
          *fail -= 1;
          bail!("injected store failure");
        }
      }
      // Full replace, like the Postgres upsert plus item rewrite.
      self
        .orders
        .lock()
        .insert(order.order_uid.clone(), order.clone());
      Ok(())
    }

    async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, anyhow::Error> {
      Ok(self.orders.lock().get(order_uid).cloned())
    }

    async fn load_all(&self) -> Result<Vec<Order>, anyhow::Error> {
      Ok(self.orders.lock().values().cloned().collect())
    }
  }

  struct MockSource {
    queue: Mutex<VecDeque<SourceMessage>>,
    acked: Mutex<Vec<i64>>,
  }

  impl MockSource {
    fn new(payloads: Vec<&[u8]>) -> Arc<Self> {
      let queue = payloads
        .into_iter()
        .enumerate()
        .map(|(i, payload)| SourceMessage {
          offset: i as i64 + 1,
          payload: payload.to_vec(),
        })
        .collect();
      Arc::new(Self {
        queue: Mutex::new(queue),
        acked: Mutex::new(Vec::new()),
      })
    }

    fn acked(&self) -> Vec<i64> {
      self.acked.lock().clone()
    }
  }

  #[async_trait]
  impl EventSource for MockSource {
    async fn fetch(&self) -> Result<SourceMessage, anyhow::Error> {
      loop {
        if let Some(message) = self.queue.lock().pop_front() {
          return Ok(message);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    }

    async fn ack(&self, message: &SourceMessage) -> Result<(), anyhow::Error> {
      self.acked.lock().push(message.offset);
      Ok(())
    }
  }

  fn order_json(uid: &str, track: &str, item_rids: &[&str]) -> Vec<u8> {
    let items: Vec<serde_json::Value> = item_rids
      .iter()
      .map(|rid| serde_json::json!({"rid": rid, "price": 100}))
      .collect();
    serde_json::to_vec(&serde_json::json!({
      "order_uid": uid,
      "track_number": track,
      "delivery": {"name": "Test Testov"},
      "payment": {"transaction": uid, "amount": 100},
      "items": items,
    }))
    .unwrap()
  }

  fn fast_retry() -> RetryPolicy {
    RetryPolicy {
      max_attempts: 5,
      base_delay: Duration::from_millis(5),
    }
  }

  fn spawn_ingestor(
    source: Arc<MockSource>,
    store: Arc<MockStore>,
    cache: Arc<OrderCache>,
    retry: RetryPolicy,
  ) -> (broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let ingestor = Ingestor::new(source, store, cache, retry);
    let handle = tokio::spawn(async move { ingestor.run(shutdown_rx).await });
    (shutdown_tx, handle)
  }

  async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
      if cond() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
  }

  #[tokio::test]
  async fn test_valid_event_persisted_cached_and_acked() {
    let source = MockSource::new(vec![&order_json("o-1", "TRACK1", &["rid-1"])]);
    let store = MockStore::new(0);
    let cache = Arc::new(OrderCache::new(10));
    let (shutdown_tx, handle) =
      spawn_ingestor(source.clone(), store.clone(), cache.clone(), fast_retry());

    let src = source.clone();
    wait_until(move || src.acked() == vec![1]).await;

    assert_eq!(store.saves(), 1);
    let stored = store.get_order("o-1").await.unwrap().unwrap();
    assert_eq!(stored.track_number, "TRACK1");
    assert_eq!(cache.get("o-1").unwrap().track_number, "TRACK1");

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_undeliverable_events_acked_without_side_effects() {
    // One unparseable payload, one parseable payload with no identifier.
    let source = MockSource::new(vec![b"{not json", &order_json("", "TRACK", &[])]);
    let store = MockStore::new(0);
    let cache = Arc::new(OrderCache::new(10));
    let (shutdown_tx, handle) =
      spawn_ingestor(source.clone(), store.clone(), cache.clone(), fast_retry());

    let src = source.clone();
    wait_until(move || src.acked() == vec![1, 2]).await;

    assert_eq!(store.saves(), 0);
    assert!(cache.is_empty());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_exhausted_retries_leave_event_uncommitted() {
    let source = MockSource::new(vec![
      &order_json("o-doomed", "T1", &[]),
      &order_json("o-next", "T2", &[]),
    ]);
    // Exactly the first message's five attempts fail.
    let store = MockStore::new(5);
    let cache = Arc::new(OrderCache::new(10));
    let started = Instant::now();
    let (shutdown_tx, handle) =
      spawn_ingestor(source.clone(), store.clone(), cache.clone(), fast_retry());

    let src = source.clone();
    wait_until(move || src.acked() == vec![2]).await;

    // Five attempts for the doomed message, one for its successor, with
    // backoff waits of at least 5+10+20+40ms in between.
    assert_eq!(store.saves(), 6);
    assert!(started.elapsed() >= Duration::from_millis(75));
    assert!(store.get_order("o-doomed").await.unwrap().is_none());
    assert!(cache.get("o-doomed").is_none());
    assert!(cache.get("o-next").is_some());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_duplicate_events_converge_to_latest() {
    let source = MockSource::new(vec![
      &order_json("o-1", "OLD", &["rid-1", "rid-2"]),
      &order_json("o-1", "NEW", &["rid-3"]),
    ]);
    let store = MockStore::new(0);
    let cache = Arc::new(OrderCache::new(10));
    let (shutdown_tx, handle) =
      spawn_ingestor(source.clone(), store.clone(), cache.clone(), fast_retry());

    let src = source.clone();
    wait_until(move || src.acked() == vec![1, 2]).await;

    let all = store.load_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].track_number, "NEW");
    let rids: Vec<&str> = all[0].items.iter().map(|i| i.rid.as_str()).collect();
    assert_eq!(rids, vec!["rid-3"]);
    assert_eq!(cache.get("o-1").unwrap().track_number, "NEW");

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_shutdown_interrupts_backoff_without_ack() {
    let source = MockSource::new(vec![&order_json("o-1", "T", &[])]);
    let store = MockStore::new(u32::MAX);
    let cache = Arc::new(OrderCache::new(10));
    let retry = RetryPolicy {
      max_attempts: 5,
      base_delay: Duration::from_secs(30),
    };
    let (shutdown_tx, handle) = spawn_ingestor(source.clone(), store.clone(), cache, retry);

    let st = store.clone();
    wait_until(move || st.saves() >= 1).await;
    shutdown_tx.send(()).unwrap();

    // The 30s backoff wait is abandoned immediately.
    tokio::time::timeout(Duration::from_secs(2), handle)
      .await
      .expect("consumer did not stop on shutdown")
      .unwrap();
    assert!(source.acked().is_empty());
  }
}
