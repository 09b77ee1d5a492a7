use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use super::OrderStore;
use crate::models::{Delivery, Item, Order, Payment};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    order_uid VARCHAR(255) PRIMARY KEY,
    track_number TEXT NOT NULL DEFAULT '',
    entry TEXT NOT NULL DEFAULT '',
    locale TEXT NOT NULL DEFAULT '',
    internal_signature TEXT NOT NULL DEFAULT '',
    customer_id TEXT NOT NULL DEFAULT '',
    delivery_service TEXT NOT NULL DEFAULT '',
    shard_key TEXT NOT NULL DEFAULT '',
    sm_id BIGINT NOT NULL DEFAULT 0,
    date_created TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    oof_shard TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS deliveries (
    order_uid VARCHAR(255) PRIMARY KEY REFERENCES orders(order_uid),
    name TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    zip TEXT NOT NULL DEFAULT '',
    city TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL DEFAULT '',
    region TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS payments (
    order_uid VARCHAR(255) PRIMARY KEY REFERENCES orders(order_uid),
    transaction TEXT NOT NULL DEFAULT '',
    request_id TEXT NOT NULL DEFAULT '',
    currency TEXT NOT NULL DEFAULT '',
    provider TEXT NOT NULL DEFAULT '',
    amount BIGINT NOT NULL DEFAULT 0,
    payment_dt BIGINT NOT NULL DEFAULT 0,
    bank TEXT NOT NULL DEFAULT '',
    delivery_cost BIGINT NOT NULL DEFAULT 0,
    goods_total BIGINT NOT NULL DEFAULT 0,
    custom_fee BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS items (
    id BIGSERIAL PRIMARY KEY,
    order_uid VARCHAR(255) NOT NULL REFERENCES orders(order_uid),
    chrt_id BIGINT NOT NULL DEFAULT 0,
    track_number TEXT NOT NULL DEFAULT '',
    price BIGINT NOT NULL DEFAULT 0,
    rid TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL DEFAULT '',
    sale BIGINT NOT NULL DEFAULT 0,
    size TEXT NOT NULL DEFAULT '',
    total_price BIGINT NOT NULL DEFAULT 0,
    nm_id BIGINT NOT NULL DEFAULT 0,
    brand TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_items_order_uid ON items(order_uid);
"#;

pub struct PostgresStore {
  pool: Pool,
}

impl PostgresStore {
  pub fn new(url: &str, _max_connections: usize) -> Result<Self, anyhow::Error> {
    let mut cfg = Config::new();
    cfg.url = Some(url.into());
    cfg.manager = Some(ManagerConfig {
      recycling_method: RecyclingMethod::Fast,
    });
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(Self { pool })
  }
}

#[async_trait]
impl OrderStore for PostgresStore {
  async fn ensure_schema(&self) -> Result<(), anyhow::Error> {
    self.pool.get().await?.batch_execute(SCHEMA).await?;
    tracing::info!("order schema initialized");
    Ok(())
  }

  async fn save_order(&self, order: &Order) -> Result<(), anyhow::Error> {
    let mut client = self.pool.get().await?;
    let tx = client.transaction().await?;

    tx.execute(
      "INSERT INTO orders (order_uid, track_number, entry, locale, internal_signature,
         customer_id, delivery_service, shard_key, sm_id, date_created, oof_shard)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
       ON CONFLICT (order_uid) DO UPDATE SET
         track_number = EXCLUDED.track_number,
         entry = EXCLUDED.entry,
         locale = EXCLUDED.locale,
         internal_signature = EXCLUDED.internal_signature,
         customer_id = EXCLUDED.customer_id,
         delivery_service = EXCLUDED.delivery_service,
         shard_key = EXCLUDED.shard_key,
         sm_id = EXCLUDED.sm_id,
         date_created = EXCLUDED.date_created,
         oof_shard = EXCLUDED.oof_shard",
      &[
        &order.order_uid,
        &order.track_number,
        &order.entry,
        &order.locale,
        &order.internal_signature,
        &order.customer_id,
        &order.delivery_service,
        &order.shard_key,
        &order.sm_id,
        &order.date_created,
        &order.oof_shard,
      ],
    )
    .await?;

    tx.execute(
      "INSERT INTO deliveries (order_uid, name, phone, zip, city, address, region, email)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
       ON CONFLICT (order_uid) DO UPDATE SET
         name = EXCLUDED.name,
         phone = EXCLUDED.phone,
         zip = EXCLUDED.zip,
         city = EXCLUDED.city,
         address = EXCLUDED.address,
         region = EXCLUDED.region,
         email = EXCLUDED.email",
      &[
        &order.order_uid,
        &order.delivery.name,
        &order.delivery.phone,
        &order.delivery.zip,
        &order.delivery.city,
        &order.delivery.address,
        &order.delivery.region,
        &order.delivery.email,
      ],
    )
    .await?;

    tx.execute(
      "INSERT INTO payments (order_uid, transaction, request_id, currency, provider,
         amount, payment_dt, bank, delivery_cost, goods_total, custom_fee)
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
       ON CONFLICT (order_uid) DO UPDATE SET
         transaction = EXCLUDED.transaction,
         request_id = EXCLUDED.request_id,
         currency = EXCLUDED.currency,
         provider = EXCLUDED.provider,
         amount = EXCLUDED.amount,
         payment_dt = EXCLUDED.payment_dt,
         bank = EXCLUDED.bank,
         delivery_cost = EXCLUDED.delivery_cost,
         goods_total = EXCLUDED.goods_total,
         custom_fee = EXCLUDED.custom_fee",
      &[
        &order.order_uid,
        &order.payment.transaction,
        &order.payment.request_id,
        &order.payment.currency,
        &order.payment.provider,
        &order.payment.amount,
        &order.payment.payment_dt,
        &order.payment.bank,
        &order.payment.delivery_cost,
        &order.payment.goods_total,
        &order.payment.custom_fee,
      ],
    )
    .await?;

    // Items are fully replaced on every write, never merged.
    tx.execute("DELETE FROM items WHERE order_uid = $1", &[&order.order_uid])
      .await?;
    for item in &order.items {
      tx.execute(
        "INSERT INTO items (order_uid, chrt_id, track_number, price, rid, name,
           sale, size, total_price, nm_id, brand, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        &[
          &order.order_uid,
          &item.chrt_id,
          &item.track_number,
          &item.price,
          &item.rid,
          &item.name,
          &item.sale,
          &item.size,
          &item.total_price,
          &item.nm_id,
          &item.brand,
          &item.status,
        ],
      )
      .await?;
    }

    tx.commit().await?;
    Ok(())
  }

  async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, anyhow::Error> {
    let client = self.pool.get().await?;

    let header = client
      .query_opt(
        "SELECT order_uid, track_number, entry, locale, internal_signature, customer_id,
           delivery_service, shard_key, sm_id, date_created, oof_shard
         FROM orders WHERE order_uid = $1",
        &[&order_uid],
      )
      .await?;
    let Some(row) = header else {
      return Ok(None);
    };

    let mut order = Order {
      order_uid: row.get(0),
      track_number: row.get(1),
      entry: row.get(2),
      locale: row.get(3),
      internal_signature: row.get(4),
      customer_id: row.get(5),
      delivery_service: row.get(6),
      shard_key: row.get(7),
      sm_id: row.get(8),
      date_created: row.get(9),
      oof_shard: row.get(10),
      ..Order::default()
    };

    if let Some(row) = client
      .query_opt(
        "SELECT name, phone, zip, city, address, region, email
         FROM deliveries WHERE order_uid = $1",
        &[&order_uid],
      )
      .await?
    {
      order.delivery = Delivery {
        name: row.get(0),
        phone: row.get(1),
        zip: row.get(2),
        city: row.get(3),
        address: row.get(4),
        region: row.get(5),
        email: row.get(6),
      };
    } else {
      tracing::warn!(order_uid, "order has no delivery row");
    }

    if let Some(row) = client
      .query_opt(
        "SELECT transaction, request_id, currency, provider, amount, payment_dt, bank,
           delivery_cost, goods_total, custom_fee
         FROM payments WHERE order_uid = $1",
        &[&order_uid],
      )
      .await?
    {
      order.payment = Payment {
        transaction: row.get(0),
        request_id: row.get(1),
        currency: row.get(2),
        provider: row.get(3),
        amount: row.get(4),
        payment_dt: row.get(5),
        bank: row.get(6),
        delivery_cost: row.get(7),
        goods_total: row.get(8),
        custom_fee: row.get(9),
      };
    } else {
      tracing::warn!(order_uid, "order has no payment row");
    }

    let rows = client
      .query(
        "SELECT chrt_id, track_number, price, rid, name, sale, size,
           total_price, nm_id, brand, status
         FROM items WHERE order_uid = $1 ORDER BY id",
        &[&order_uid],
      )
      .await?;
    order.items = rows
      .iter()
      .map(|row| Item {
        chrt_id: row.get(0),
        track_number: row.get(1),
        price: row.get(2),
        rid: row.get(3),
        name: row.get(4),
        sale: row.get(5),
        size: row.get(6),
        total_price: row.get(7),
        nm_id: row.get(8),
        brand: row.get(9),
        status: row.get(10),
      })
      .collect();

    Ok(Some(order))
  }

  async fn load_all(&self) -> Result<Vec<Order>, anyhow::Error> {
    let client = self.pool.get().await?;

    // Deterministic ordering: after warm-up the cache retains the *last* C
    // orders of this sequence, so the newest orders stay resident.
    let rows = client
      .query(
        "SELECT order_uid FROM orders ORDER BY date_created, order_uid",
        &[],
      )
      .await?;
    drop(client);

    let mut orders = Vec::with_capacity(rows.len());
    for row in rows {
      let uid: String = row.get(0);
      match self.get_order(&uid).await? {
        Some(order) => orders.push(order),
        None => tracing::warn!(order_uid = %uid, "order disappeared during bulk load"),
      }
    }
    Ok(orders)
  }
}
