mod postgres;

pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::models::Order;

/// Abstract durable order store.
///
/// Writes are full replacements keyed by `order_uid`: persisting the same
/// identifier twice leaves exactly one stored order with the latest field
/// values and the latest item set.
#[async_trait]
pub trait OrderStore: Send + Sync {
  /// Idempotently creates the schema.
  async fn ensure_schema(&self) -> Result<(), anyhow::Error>;

  /// Upserts the full order in one transaction.
  async fn save_order(&self, order: &Order) -> Result<(), anyhow::Error>;

  /// Point lookup by identifier; `None` when no such order exists.
  async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, anyhow::Error>;

  /// Every stored order, in deterministic `(date_created, order_uid)`
  /// ascending order. Used once at startup to warm the cache.
  async fn load_all(&self) -> Result<Vec<Order>, anyhow::Error>;
}
