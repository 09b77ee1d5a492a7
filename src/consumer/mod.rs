mod pg_queue;
mod pipeline;

pub use pg_queue::PgQueueSource;
pub use pipeline::{IngestError, Ingestor, RetryPolicy};

use async_trait::async_trait;

/// One delivered change event.
#[derive(Debug, Clone)]
pub struct SourceMessage {
  /// Position of the event within its topic; committed back on ack.
  pub offset: i64,
  pub payload: Vec<u8>,
}

/// Abstract at-least-once change event source.
///
/// `fetch` hands out the next uncommitted message and advances only the
/// in-session cursor; a message is out of the redelivery window only once
/// `ack` durably commits its offset. Anything fetched but never acked is
/// redelivered after a restart.
#[async_trait]
pub trait EventSource: Send + Sync {
  /// Waits until the next message is available. Cancellation is applied by
  /// the caller racing this future against the shutdown signal.
  async fn fetch(&self) -> Result<SourceMessage, anyhow::Error>;

  /// Commits the message's offset so it is never redelivered.
  async fn ack(&self, message: &SourceMessage) -> Result<(), anyhow::Error>;
}
