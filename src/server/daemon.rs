use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use super::ServerConfig;
use crate::api::{build_router, AppState};
use crate::cache::OrderCache;
use crate::consumer::{EventSource, Ingestor, RetryPolicy};
use crate::db::OrderStore;

/// Process wiring: one store, one event source, one cache, constructed once
/// and shared by reference between the consumer and the lookup path.
pub struct Daemon {
  config: ServerConfig,
  store: Arc<dyn OrderStore>,
  source: Arc<dyn EventSource>,
  cache: Arc<OrderCache>,
  shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
  pub fn new(
    config: ServerConfig,
    store: Arc<dyn OrderStore>,
    source: Arc<dyn EventSource>,
  ) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    let cache = Arc::new(OrderCache::new(config.cache.capacity));
    tracing::info!(capacity = config.cache.capacity, "order cache created");

    Self {
      config,
      store,
      source,
      cache,
      shutdown_tx,
    }
  }

  /// Trigger graceful shutdown of the consumer and the HTTP server.
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  pub async fn run(&self) -> Result<(), anyhow::Error> {
    // Connectivity problems here are fatal; retries only cover the
    // steady-state persist path.
    self.store.ensure_schema().await?;

    tracing::info!("warming cache from store...");
    let orders = self.store.load_all().await?;
    let loaded = orders.len();
    for order in orders {
      self.cache.set(order.order_uid.clone(), order);
    }
    // With more stored orders than capacity, the last-loaded ones stay
    // resident; load_all orders by (date_created, order_uid) so this is the
    // newest orders.
    tracing::info!(loaded, resident = self.cache.len(), "cache warmed");

    let ingestor = Ingestor::new(
      self.source.clone(),
      self.store.clone(),
      self.cache.clone(),
      RetryPolicy::default(),
    );
    let consumer_shutdown = self.shutdown_tx.subscribe();
    tokio::spawn(async move { ingestor.run(consumer_shutdown).await });

    let state = Arc::new(AppState {
      store: self.store.clone(),
      cache: self.cache.clone(),
      lookup_timeout: Duration::from_millis(self.config.limits.lookup_timeout_ms),
    });
    let app = build_router(state);
    let addr = self.config.address();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("HTTP server listening on {}", addr);

    let mut shutdown_rx = self.shutdown_tx.subscribe();
    axum::serve(listener, app)
      .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
      })
      .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
  }
}
