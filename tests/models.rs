//! Order wire-format tests

use orderhub::models::Order;

const FULL_ORDER: &str = r#"{
  "order_uid": "b563feb7b2b84b6test",
  "track_number": "WBILMTESTTRACK",
  "entry": "WBIL",
  "delivery": {
    "name": "Test Testov",
    "phone": "+9720000000",
    "zip": "2639809",
    "city": "Kiryat Mozkin",
    "address": "Ploshad Mira 15",
    "region": "Kraiot",
    "email": "test@gmail.com"
  },
  "payment": {
    "transaction": "b563feb7b2b84b6test",
    "request_id": "",
    "currency": "USD",
    "provider": "wbpay",
    "amount": 1817,
    "payment_dt": 1637907727,
    "bank": "alpha",
    "delivery_cost": 1500,
    "goods_total": 317,
    "custom_fee": 0
  },
  "items": [
    {
      "chrt_id": 9934930,
      "track_number": "WBILMTESTTRACK",
      "price": 453,
      "rid": "ab4219087a764ae0btest",
      "name": "Mascaras",
      "sale": 30,
      "size": "0",
      "total_price": 317,
      "nm_id": 2389212,
      "brand": "Vivienne Sabo",
      "status": 202
    }
  ],
  "locale": "en",
  "internal_signature": "",
  "customer_id": "test",
  "delivery_service": "meest",
  "shardkey": "9",
  "sm_id": 99,
  "date_created": "2021-11-26T06:22:19Z",
  "oof_shard": "1"
}"#;

#[test]
fn test_decode_full_order() {
  let order: Order = serde_json::from_str(FULL_ORDER).unwrap();
  assert_eq!(order.order_uid, "b563feb7b2b84b6test");
  assert_eq!(order.track_number, "WBILMTESTTRACK");
  assert_eq!(order.shard_key, "9");
  assert_eq!(order.sm_id, 99);
  assert_eq!(order.delivery.city, "Kiryat Mozkin");
  assert_eq!(order.payment.amount, 1817);
  assert_eq!(order.items.len(), 1);
  assert_eq!(order.items[0].chrt_id, 9934930);
  assert_eq!(order.items[0].status, 202);
}

#[test]
fn test_unknown_fields_are_ignored() {
  let json = r#"{"order_uid": "o-1", "some_future_field": {"nested": true}}"#;
  let order: Order = serde_json::from_str(json).unwrap();
  assert_eq!(order.order_uid, "o-1");
  assert!(order.items.is_empty());
}

#[test]
fn test_missing_identifier_decodes_to_empty_string() {
  // Validation of the identifier happens in the pipeline, not in serde.
  let json = r#"{"track_number": "WBILMTESTTRACK"}"#;
  let order: Order = serde_json::from_str(json).unwrap();
  assert!(order.order_uid.is_empty());
}

#[test]
fn test_roundtrip_preserves_item_order() {
  let mut order: Order = serde_json::from_str(FULL_ORDER).unwrap();
  order.items.push(orderhub::models::Item {
    rid: "second".into(),
    ..Default::default()
  });

  let encoded = serde_json::to_string(&order).unwrap();
  let decoded: Order = serde_json::from_str(&encoded).unwrap();
  assert_eq!(decoded.items.len(), 2);
  assert_eq!(decoded.items[1].rid, "second");
  assert_eq!(decoded, order);
}
