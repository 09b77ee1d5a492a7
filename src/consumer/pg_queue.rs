use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use parking_lot::Mutex;
use tokio_postgres::NoTls;

use super::{EventSource, SourceMessage};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id BIGSERIAL PRIMARY KEY,
    topic VARCHAR(255) NOT NULL,
    payload BYTEA NOT NULL,
    published_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_events_topic_id ON events(topic, id);

CREATE TABLE IF NOT EXISTS consumer_offsets (
    topic VARCHAR(255) NOT NULL,
    group_id VARCHAR(255) NOT NULL,
    committed BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (topic, group_id)
);
"#;

/// Postgres-backed at-least-once event queue.
///
/// Delivery and commit are decoupled the way a partitioned broker does it:
/// `fetch` advances an in-session cursor past every delivered message, so a
/// message that never gets acked does not wedge the session, while `ack`
/// upserts the durable committed offset for this consumer group. On restart
/// the cursor resets to the committed offset and anything unacked is
/// redelivered.
pub struct PgQueueSource {
  pool: Pool,
  topic: String,
  group_id: String,
  poll_interval: Duration,
  // In-session delivery cursor; None until the committed offset is loaded.
  cursor: Mutex<Option<i64>>,
}

impl PgQueueSource {
  pub fn new(
    url: &str,
    topic: &str,
    group_id: &str,
    poll_interval: Duration,
  ) -> Result<Self, anyhow::Error> {
    let mut cfg = Config::new();
    cfg.url = Some(url.into());
    cfg.manager = Some(ManagerConfig {
      recycling_method: RecyclingMethod::Fast,
    });
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(Self {
      pool,
      topic: topic.into(),
      group_id: group_id.into(),
      poll_interval,
      cursor: Mutex::new(None),
    })
  }

  pub async fn ensure_schema(&self) -> Result<(), anyhow::Error> {
    self.pool.get().await?.batch_execute(SCHEMA).await?;
    tracing::info!(topic = %self.topic, "event queue schema initialized");
    Ok(())
  }

  /// Appends an event to the topic. Producer side; used for seeding and
  /// tests.
  pub async fn publish(&self, payload: &[u8]) -> Result<i64, anyhow::Error> {
    let row = self
      .pool
      .get()
      .await?
      .query_one(
        "INSERT INTO events (topic, payload) VALUES ($1, $2) RETURNING id",
        &[&self.topic, &payload],
      )
      .await?;
    Ok(row.get(0))
  }

  async fn committed_offset(&self) -> Result<i64, anyhow::Error> {
    let row = self
      .pool
      .get()
      .await?
      .query_opt(
        "SELECT committed FROM consumer_offsets WHERE topic = $1 AND group_id = $2",
        &[&self.topic, &self.group_id],
      )
      .await?;
    Ok(row.map(|r| r.get(0)).unwrap_or(0))
  }
}

#[async_trait]
impl EventSource for PgQueueSource {
  async fn fetch(&self) -> Result<SourceMessage, anyhow::Error> {
    loop {
      let cursor = *self.cursor.lock();
      let after = match cursor {
        Some(id) => id,
        None => {
          let committed = self.committed_offset().await?;
          *self.cursor.lock() = Some(committed);
          committed
        }
      };

      let row = self
        .pool
        .get()
        .await?
        .query_opt(
          "SELECT id, payload FROM events WHERE topic = $1 AND id > $2 ORDER BY id LIMIT 1",
          &[&self.topic, &after],
        )
        .await?;

      if let Some(row) = row {
        let message = SourceMessage {
          offset: row.get(0),
          payload: row.get(1),
        };
        *self.cursor.lock() = Some(message.offset);
        return Ok(message);
      }

      tokio::time::sleep(self.poll_interval).await;
    }
  }

  async fn ack(&self, message: &SourceMessage) -> Result<(), anyhow::Error> {
    self
      .pool
      .get()
      .await?
      .execute(
        "INSERT INTO consumer_offsets (topic, group_id, committed) VALUES ($1, $2, $3)
         ON CONFLICT (topic, group_id) DO UPDATE SET committed = EXCLUDED.committed",
        &[&self.topic, &self.group_id, &message.offset],
      )
      .await?;
    Ok(())
  }
}
