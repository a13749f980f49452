//! Integration tests for the order broker.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory tests (no external services)
//! cargo test -p order-broker-integration-tests
//!
//! # Including the PostgreSQL round trip
//! DATABASE_URL=postgres://... cargo test -p order-broker-integration-tests -- --include-ignored
//! ```
//!
//! # Test Doubles
//!
//! - [`MemoryOrderStore`] - `OrderStore` over a map, with outage and latency injection
//! - [`MemoryLog`] / [`MemoryStream`] - a single partition whose committed
//!   position survives [`MemoryLog::open`], which stands in for a restart

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use order_broker::config::IntakeConfig;
use order_broker::db::{OrderStore, RepositoryError};
use order_broker::stream::{CommitTracker, MessageStream, StreamError, StreamMessage};
use order_broker_core::{Delivery, Item, Order, OrderUid, Payment};

/// Topic name used by [`MemoryLog`].
pub const TOPIC: &str = "orders";

// =============================================================================
// Store
// =============================================================================

/// In-memory [`OrderStore`].
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
    unavailable: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    insert_attempts: AtomicUsize,
    lookups: AtomicUsize,
}

impl MemoryOrderStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A store already holding `orders`.
    #[must_use]
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut map = store.orders.lock().unwrap_or_else(PoisonError::into_inner);
            for order in orders {
                map.insert(order.order_uid.clone(), order);
            }
        }
        Arc::new(store)
    }

    /// Make every operation fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every insert by `delay`.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// The stored copy of one order.
    #[must_use]
    pub fn stored(&self, uid: &str) -> Option<Order> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .cloned()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls to `insert_order`, successful or not.
    #[must_use]
    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    /// Calls to `get_full_order`, successful or not.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check_available()
    }

    async fn get_full_order(&self, uid: &OrderUid) -> Result<Order, RepositoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.stored(uid.as_str()).ok_or(RepositoryError::NotFound)
    }

    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        let uid = order.uid()?;

        let delay = *self.write_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;

        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid.into_inner(), order.clone());
        Ok(())
    }

    async fn get_all_orders(&self) -> Result<Vec<Order>, RepositoryError> {
        self.check_available()?;
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.order_uid.cmp(&b.order_uid));
        Ok(orders)
    }
}

// =============================================================================
// Stream
// =============================================================================

#[derive(Debug, Default)]
struct LogInner {
    messages: Vec<StreamMessage>,
    committed: Option<i64>,
    failing_reads: usize,
}

/// One in-memory partition with a durable committed position.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<LogInner>>,
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw payload and return its offset.
    pub fn append(&self, key: Option<&str>, payload: impl Into<Vec<u8>>) -> i64 {
        let mut inner = self.lock();
        let offset = i64::try_from(inner.messages.len()).unwrap_or(i64::MAX);
        inner.messages.push(StreamMessage {
            topic: TOPIC.to_string(),
            partition: 0,
            offset,
            key: key.map(str::to_string),
            payload: payload.into(),
        });
        offset
    }

    /// Append an order as JSON keyed by its id.
    ///
    /// # Panics
    ///
    /// Panics if the order cannot be serialized.
    #[allow(clippy::unwrap_used)]
    pub fn append_order(&self, order: &Order) -> i64 {
        self.append(
            Some(order.order_uid.as_str()),
            serde_json::to_vec(order).unwrap(),
        )
    }

    /// Make the next `count` reads fail.
    pub fn fail_reads(&self, count: usize) {
        self.lock().failing_reads = count;
    }

    /// The committed position: the offset a new reader starts from.
    #[must_use]
    pub fn committed(&self) -> Option<i64> {
        self.lock().committed
    }

    /// Open a reader at the committed position (or the start of the log).
    #[must_use]
    pub fn open(&self) -> MemoryStream {
        let start = self.committed().unwrap_or(0);
        MemoryStream {
            log: self.clone(),
            next: start,
            tracker: CommitTracker::starting_at(start),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reader over a [`MemoryLog`].
#[derive(Debug)]
pub struct MemoryStream {
    log: MemoryLog,
    next: i64,
    tracker: CommitTracker,
}

impl MemoryStream {
    /// Offset of the next message this reader will return.
    #[must_use]
    pub const fn next_offset(&self) -> i64 {
        self.next
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn next_message(&mut self, wait: Duration) -> Result<Option<StreamMessage>, StreamError> {
        let message = {
            let mut inner = self.log.lock();
            if inner.failing_reads > 0 {
                inner.failing_reads -= 1;
                return Err(StreamError::Unavailable("injected read failure".to_string()));
            }
            usize::try_from(self.next)
                .ok()
                .and_then(|i| inner.messages.get(i).cloned())
        };

        let Some(message) = message else {
            tokio::time::sleep(wait).await;
            return Ok(None);
        };

        self.next = message.offset + 1;
        self.tracker.observe(message.offset);
        Ok(Some(message))
    }

    async fn commit(&mut self, message: &StreamMessage) -> Result<(), StreamError> {
        if let Some(position) = self.tracker.ack(message.offset) {
            self.log.lock().committed = Some(position);
        }
        Ok(())
    }

    async fn rewind(&mut self, message: &StreamMessage) -> Result<(), StreamError> {
        self.next = message.offset;
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Intake settings with short waits so tests run quickly.
#[must_use]
pub fn fast_intake_config() -> IntakeConfig {
    IntakeConfig {
        read_timeout: Duration::from_millis(10),
        retry_backoff: Duration::from_millis(10),
        write_timeout: Duration::from_millis(500),
        skip_unprocessable: false,
    }
}

/// Fixed creation time with whole-second precision, so values survive a
/// database round trip unchanged.
#[must_use]
pub fn created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19)
        .single()
        .unwrap_or_default()
}

/// A complete order with `items` line items.
#[must_use]
pub fn sample_order(uid: &str, items: usize) -> Order {
    let items: Vec<Item> = (0..items)
        .map(|i| {
            let n = i32::try_from(i).unwrap_or(0);
            Item {
                chrt_id: 9_934_930 + i64::from(n),
                track_number: "WBILMTESTTRACK".to_string(),
                price: 453 + n,
                rid: format!("ab4219087a764ae0b{i}test"),
                name: format!("Mascaras {i}"),
                sale: 30,
                size: "0".to_string(),
                total_price: 317,
                nm_id: 2_389_212,
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            }
        })
        .collect();

    Order {
        order_uid: uid.to_string(),
        track_number: "WBILMTESTTRACK".to_string(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: uid.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817,
            payment_dt: 1_637_907_727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total: 317,
            custom_fee: 0,
        },
        items,
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shardkey: "9".to_string(),
        sm_id: 99,
        date_created: created_at(),
        oof_shard: "1".to_string(),
    }
}
