use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::models::Order;

/// Bounded LRU cache over full orders, keyed by `order_uid`.
///
/// Capacity is fixed at construction. `get` promotes the entry to
/// most-recently-used, so it mutates the recency order and takes the same
/// exclusive lock as `set`; a shared lock here would let concurrent readers
/// corrupt the linked recency structure.
///
/// A capacity of zero retains nothing: every `set` is dropped and every
/// `get` misses. Entries are only ever removed by eviction at capacity;
/// there is no delete, TTL or explicit invalidation.
pub struct OrderCache {
  // None when constructed with capacity 0.
  inner: Option<Mutex<LruCache<String, Order>>>,
}

impl OrderCache {
  pub fn new(capacity: usize) -> Self {
    Self {
      inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
    }
  }

  /// Returns a copy of the cached order and promotes it to
  /// most-recently-used.
  pub fn get(&self, order_uid: &str) -> Option<Order> {
    let inner = self.inner.as_ref()?;
    inner.lock().get(order_uid).cloned()
  }

  /// Inserts or replaces the order at the most-recently-used position,
  /// evicting the least-recently-used entry when at capacity.
  pub fn set(&self, order_uid: String, order: Order) {
    if let Some(inner) = &self.inner {
      inner.lock().put(order_uid, order);
    }
  }

  /// Point-in-time copy of every resident entry, in no particular order.
  /// Does not touch recency; used for warm-up diagnostics only.
  pub fn snapshot(&self) -> HashMap<String, Order> {
    match &self.inner {
      Some(inner) => inner
        .lock()
        .iter()
        .map(|(uid, order)| (uid.clone(), order.clone()))
        .collect(),
      None => HashMap::new(),
    }
  }

  pub fn len(&self) -> usize {
    match &self.inner {
      Some(inner) => inner.lock().len(),
      None => 0,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
