//! The order aggregate.
//!
//! An [`Order`] owns exactly one [`Delivery`], exactly one [`Payment`], and an
//! ordered list of [`Item`]s. The JSON shape is the one producers publish to the
//! `orders` topic and the one the lookup API returns.
//!
//! Scalar fields that a producer leaves out decode to their zero value. The
//! `delivery` and `payment` objects themselves are required.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{OrderUid, OrderUidError};

/// Order header plus its owned substructures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Producer-assigned identifier. Left as a plain string here because an
    /// empty value must survive decoding so it can be rejected as a validation
    /// failure rather than a decode failure; see [`Order::uid`].
    #[serde(default)]
    pub order_uid: String,
    #[serde(default)]
    pub track_number: String,
    #[serde(default)]
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub delivery_service: String,
    #[serde(default)]
    pub shardkey: String,
    #[serde(default)]
    pub sm_id: i32,
    #[serde(default)]
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub oof_shard: String,
}

/// Recipient details. One per order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment details. One per order.
///
/// Monetary amounts are integer minor units as sent by the producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i32,
    /// Unix timestamp (seconds).
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i32,
    pub goods_total: i32,
    pub custom_fee: i32,
}

/// A line item. Orders carry zero or more, in producer order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i32,
    pub rid: String,
    pub name: String,
    /// Discount percentage.
    pub sale: i32,
    pub size: String,
    /// Price after discount.
    pub total_price: i32,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

impl Order {
    /// Validate and return this order's identifier.
    ///
    /// # Errors
    ///
    /// Returns `OrderUidError` if `order_uid` is blank or too long.
    pub fn uid(&self) -> Result<OrderUid, OrderUidError> {
        OrderUid::parse(&self.order_uid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const FULL_ORDER: &str = r#"{
        "order_uid": "order001",
        "track_number": "TRACK001",
        "entry": "WBIL",
        "delivery": {
            "name": "Ivan Petrov",
            "phone": "+79000000001",
            "zip": "123456",
            "city": "Moscow",
            "address": "Lenina 1",
            "region": "Moscow",
            "email": "ivan@example.com"
        },
        "payment": {
            "transaction": "order001",
            "request_id": "",
            "currency": "RUB",
            "provider": "wbpay",
            "amount": 1000,
            "payment_dt": 1637900001,
            "bank": "sber",
            "delivery_cost": 200,
            "goods_total": 800,
            "custom_fee": 0
        },
        "items": [{
            "chrt_id": 1111111,
            "track_number": "TRACK001",
            "price": 800,
            "rid": "rid001",
            "name": "T-shirt",
            "sale": 0,
            "size": "M",
            "total_price": 800,
            "nm_id": 1010101,
            "brand": "Uniqlo",
            "status": 202
        }],
        "locale": "ru",
        "internal_signature": "",
        "customer_id": "cust001",
        "delivery_service": "cdek",
        "shardkey": "1",
        "sm_id": 1,
        "date_created": "2021-11-26T06:22:19Z",
        "oof_shard": "1"
    }"#;

    #[test]
    fn test_decode_full_order() {
        let order: Order = serde_json::from_str(FULL_ORDER).unwrap();
        assert_eq!(order.order_uid, "order001");
        assert_eq!(order.delivery.city, "Moscow");
        assert_eq!(order.payment.amount, 1000);
        assert_eq!(order.payment.payment_dt, 1_637_900_001);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].nm_id, 1_010_101);
        assert_eq!(order.date_created.to_rfc3339(), "2021-11-26T06:22:19+00:00");
        assert_eq!(order.uid().unwrap().as_str(), "order001");
    }

    #[test]
    fn test_missing_uid_decodes_but_fails_validation() {
        let json = r#"{"track_number": "T", "delivery": {}, "payment": {}}"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert!(order.order_uid.is_empty());
        assert!(order.items.is_empty());
        assert_eq!(order.uid(), Err(OrderUidError::Empty));
    }

    #[test]
    fn test_missing_payment_is_a_decode_error() {
        let json = r#"{"order_uid": "x", "delivery": {}}"#;
        assert!(serde_json::from_str::<Order>(json).is_err());
    }

    #[test]
    fn test_non_object_is_a_decode_error() {
        assert!(serde_json::from_str::<Order>("[1, 2, 3]").is_err());
        assert!(serde_json::from_slice::<Order>(b"not json").is_err());
    }

    #[test]
    fn test_encode_uses_wire_names() {
        let order: Order = serde_json::from_str(FULL_ORDER).unwrap();
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["shardkey"], "1");
        assert_eq!(value["payment"]["delivery_cost"], 200);
        assert_eq!(value["items"][0]["chrt_id"], 1_111_111);
    }
}
