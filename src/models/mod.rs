use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A full order as carried on the wire and stored in the database.
///
/// Orders are always read and written as a single unit: header, delivery,
/// payment and the complete item list. Unknown JSON fields are ignored on
/// decode; a missing `order_uid` decodes to an empty string and is rejected
/// by pipeline validation rather than at the serde layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
  #[serde(default)]
  pub order_uid: String,
  #[serde(default)]
  pub track_number: String,
  #[serde(default)]
  pub entry: String,
  #[serde(default)]
  pub locale: String,
  #[serde(default)]
  pub internal_signature: String,
  #[serde(default)]
  pub customer_id: String,
  #[serde(default)]
  pub delivery_service: String,
  #[serde(default, rename = "shardkey")]
  pub shard_key: String,
  #[serde(default)]
  pub sm_id: i64,
  #[serde(default = "default_date")]
  pub date_created: DateTime<Utc>,
  #[serde(default)]
  pub oof_shard: String,
  #[serde(default)]
  pub delivery: Delivery,
  #[serde(default)]
  pub payment: Payment,
  #[serde(default)]
  pub items: Vec<Item>,
}

fn default_date() -> DateTime<Utc> {
  DateTime::<Utc>::UNIX_EPOCH
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub phone: String,
  #[serde(default)]
  pub zip: String,
  #[serde(default)]
  pub city: String,
  #[serde(default)]
  pub address: String,
  #[serde(default)]
  pub region: String,
  #[serde(default)]
  pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payment {
  #[serde(default)]
  pub transaction: String,
  #[serde(default)]
  pub request_id: String,
  #[serde(default)]
  pub currency: String,
  #[serde(default)]
  pub provider: String,
  #[serde(default)]
  pub amount: i64,
  #[serde(default)]
  pub payment_dt: i64,
  #[serde(default)]
  pub bank: String,
  #[serde(default)]
  pub delivery_cost: i64,
  #[serde(default)]
  pub goods_total: i64,
  #[serde(default)]
  pub custom_fee: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
  #[serde(default)]
  pub chrt_id: i64,
  #[serde(default)]
  pub track_number: String,
  #[serde(default)]
  pub price: i64,
  #[serde(default)]
  pub rid: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub sale: i64,
  #[serde(default)]
  pub size: String,
  #[serde(default)]
  pub total_price: i64,
  #[serde(default)]
  pub nm_id: i64,
  #[serde(default)]
  pub brand: String,
  #[serde(default)]
  pub status: i32,
}
