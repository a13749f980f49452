//! Sample order producer.
//!
//! Publishes order JSON to the topic the broker consumes, keyed by order id.
//! Orders are either generated (`order001`, `order002`, ...) or read from a
//! file holding a JSON array. Entries in a file are sent as-is, so it can
//! also carry malformed or id-less payloads for exercising the broker.
//!
//! # Usage
//!
//! ```bash
//! # Three generated orders
//! ob-cli produce --count 3
//!
//! # Generated orders followed by one without an order_uid
//! ob-cli produce --count 3 --with-invalid
//!
//! # Orders from a file
//! ob-cli produce --file orders.json
//! ```
//!
//! # Environment Variables
//!
//! - `KAFKA_BROKERS` - Bootstrap servers (default: localhost:9092)
//! - `KAFKA_TOPIC` - Target topic (default: orders)
//! - `KAFKA_PARTITION` - Target partition (default: 0)

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use order_broker_core::{Delivery, Item, Order, Payment};
use rand::Rng;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde_json::Value;
use tracing::{info, warn};

/// Delivery timeout for one message.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between messages so the consumer logs stay readable.
const SEND_INTERVAL: Duration = Duration::from_millis(500);

/// Source of the messages to publish.
pub enum Source<'a> {
    Generated { count: usize, with_invalid: bool },
    File(&'a Path),
}

/// Publish sample orders.
///
/// Individual send failures are logged and do not stop the run.
///
/// # Errors
///
/// Returns an error if the producer cannot be created, the file cannot be
/// read, or its contents are not a JSON array.
pub async fn run(source: Source<'_>) -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let brokers = std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
    let topic = std::env::var("KAFKA_TOPIC").unwrap_or_else(|_| "orders".to_string());
    let partition: i32 = std::env::var("KAFKA_PARTITION")
        .unwrap_or_else(|_| "0".to_string())
        .parse()
        .map_err(|e| format!("Invalid KAFKA_PARTITION: {e}"))?;

    let messages = match source {
        Source::Generated {
            count,
            with_invalid,
        } => generated(count, with_invalid)?,
        Source::File(path) => from_file(path).await?,
    };

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("message.timeout.ms", "5000")
        .create()?;

    info!(brokers = %brokers, topic = %topic, partition, count = messages.len(), "Producing orders");

    let mut sent = 0usize;
    for (key, payload) in &messages {
        let record = FutureRecord::to(&topic)
            .partition(partition)
            .key(key)
            .payload(payload);

        match producer.send(record, SEND_TIMEOUT).await {
            Ok(delivery) => {
                sent += 1;
                info!(key = %key, ?delivery, "Message written");
            }
            Err((e, _)) => warn!(key = %key, error = %e, "Failed to write message"),
        }

        tokio::time::sleep(SEND_INTERVAL).await;
    }

    info!(sent, failed = messages.len() - sent, "Producer finished");
    Ok(())
}

/// Build `count` generated orders, plus an id-less one if requested.
fn generated(
    count: usize,
    with_invalid: bool,
) -> Result<Vec<(String, Vec<u8>)>, serde_json::Error> {
    let mut rng = rand::rng();
    let mut messages = Vec::with_capacity(count + usize::from(with_invalid));

    for n in 1..=count {
        let order = sample_order(&mut rng, n);
        messages.push((order.order_uid.clone(), serde_json::to_vec(&order)?));
    }

    if with_invalid {
        let n = count + 1;
        let mut order = sample_order(&mut rng, n);
        order.order_uid = String::new();
        messages.push((format!("order{n:03}_invalid"), serde_json::to_vec(&order)?));
    }

    Ok(messages)
}

/// Read a JSON array of payloads. Each is keyed by its `order_uid`, or by its
/// position when it has none.
async fn from_file(path: &Path) -> Result<Vec<(String, Vec<u8>)>, Box<dyn std::error::Error>> {
    info!(path = %path.display(), "Loading orders from file");

    let content = tokio::fs::read_to_string(path).await?;
    let Value::Array(entries) = serde_json::from_str::<Value>(&content)? else {
        return Err(format!("{} must contain a JSON array", path.display()).into());
    };

    let mut messages = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let key = entry
            .get("order_uid")
            .and_then(Value::as_str)
            .filter(|uid| !uid.trim().is_empty())
            .map_or_else(|| format!("entry{}_invalid", i + 1), str::to_string);
        messages.push((key, serde_json::to_vec(entry)?));
    }

    Ok(messages)
}

/// A plausible order with one to three items.
#[allow(clippy::indexing_slicing)]
fn sample_order(rng: &mut impl Rng, n: usize) -> Order {
    const CITIES: [(&str, &str); 4] = [
        ("Moscow", "Moscow"),
        ("Saint Petersburg", "Leningrad"),
        ("Kazan", "Tatarstan"),
        ("Novosibirsk", "Novosibirsk"),
    ];
    const PRODUCTS: [(&str, &str, &str); 4] = [
        ("T-shirt", "Uniqlo", "M"),
        ("Shoes", "Nike", "42"),
        ("Laptop", "Lenovo", "-"),
        ("Backpack", "Adidas", "L"),
    ];

    let uid = format!("order{n:03}");
    let track_number = format!("TRACK{n:03}");
    let (city, region) = CITIES[rng.random_range(0..CITIES.len())];

    let items: Vec<Item> = (0..rng.random_range(1..=3))
        .map(|i| {
            let (name, brand, size) = PRODUCTS[rng.random_range(0..PRODUCTS.len())];
            let price = rng.random_range(100..5000);
            let sale = [0, 5, 10, 25][rng.random_range(0..4)];
            Item {
                chrt_id: rng.random_range(1_000_000..10_000_000),
                track_number: track_number.clone(),
                price,
                rid: format!("rid{n:03}-{i}"),
                name: name.to_string(),
                sale,
                size: size.to_string(),
                total_price: price * (100 - sale) / 100,
                nm_id: rng.random_range(1_000_000..10_000_000),
                brand: brand.to_string(),
                status: 202,
            }
        })
        .collect();

    let goods_total: i32 = items.iter().map(|i| i.total_price).sum();
    let delivery_cost = rng.random_range(1..=5) * 100;
    let created: DateTime<Utc> = Utc::now() - ChronoDuration::minutes(rng.random_range(0..10_000));

    Order {
        order_uid: uid.clone(),
        track_number,
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: format!("Customer {n}"),
            phone: format!("+7900{n:07}"),
            zip: format!("{:06}", rng.random_range(100_000..1_000_000)),
            city: city.to_string(),
            address: format!("Lenina {n}"),
            region: region.to_string(),
            email: format!("customer{n}@example.com"),
        },
        payment: Payment {
            transaction: uid,
            request_id: String::new(),
            currency: "RUB".to_string(),
            provider: "wbpay".to_string(),
            amount: goods_total + delivery_cost,
            payment_dt: created.timestamp(),
            bank: "sber".to_string(),
            delivery_cost,
            goods_total,
            custom_fee: 0,
        },
        items,
        locale: "ru".to_string(),
        internal_signature: String::new(),
        customer_id: format!("cust{n:03}"),
        delivery_service: "cdek".to_string(),
        shardkey: (n % 10).to_string(),
        sm_id: i32::try_from(n % 100).unwrap_or_default(),
        date_created: created,
        oof_shard: "1".to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_order_is_consistent() {
        let mut rng = rand::rng();
        let order = sample_order(&mut rng, 7);

        assert_eq!(order.order_uid, "order007");
        assert!(order.uid().is_ok());
        assert!((1..=3).contains(&order.items.len()));
        let goods: i32 = order.items.iter().map(|i| i.total_price).sum();
        assert_eq!(order.payment.goods_total, goods);
        assert_eq!(order.payment.amount, goods + order.payment.delivery_cost);
    }

    #[test]
    fn test_generated_appends_invalid_order() {
        let messages = generated(2, true).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].0, "order001");
        assert_eq!(messages[2].0, "order003_invalid");

        let invalid: Order = serde_json::from_slice(&messages[2].1).unwrap();
        assert!(invalid.uid().is_err());
    }
}
