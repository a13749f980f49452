//! In-memory order cache.
//!
//! A single `RwLock` guards the whole table: lookups share the read lock and
//! never block each other, while upserts and deletes take the write lock and
//! exclude everyone else. Entries are whole aggregates, so a reader sees either
//! the previous order or the new one, never a mix.
//!
//! Entries are never evicted. The table lives as long as the
//! process and grows with the number of distinct orders. If lock contention ever
//! shows up, the key space can be split by a hash of `order_uid` into several
//! independently locked tables behind the same API.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use order_broker_core::{Order, OrderUid};

/// Shared handle to the order table.
///
/// Cheap to clone; every clone refers to the same table. Created once at
/// startup and shared by the intake consumer and the HTTP handlers.
#[derive(Clone, Default)]
pub struct OrderCache {
    inner: Arc<RwLock<HashMap<OrderUid, Order>>>,
}

impl OrderCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or wholesale replace the entry for `uid`.
    ///
    /// `uid` must be the validated form of `order.order_uid`.
    pub fn set(&self, uid: OrderUid, order: Order) {
        debug_assert_eq!(uid.as_str(), order.order_uid);
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid, order);
    }

    /// Look up an order by identifier.
    #[must_use]
    pub fn get(&self, uid: &str) -> Option<Order> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .cloned()
    }

    /// Remove an entry. Returns `true` if something was removed.
    pub fn delete(&self, uid: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uid)
            .is_some()
    }

    /// Point-in-time copy of every cached order, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Order> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of cached orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for OrderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use order_broker_core::{Delivery, Item, Payment};

    use super::*;

    fn order(uid: &str, items: usize) -> Order {
        Order {
            order_uid: uid.to_string(),
            track_number: format!("TRACK-{uid}"),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: "Test Testov".to_string(),
                city: "Kiryat Mozkin".to_string(),
                ..Delivery::default()
            },
            payment: Payment {
                transaction: uid.to_string(),
                currency: "USD".to_string(),
                amount: 1817,
                ..Payment::default()
            },
            items: (0..items)
                .map(|i| Item {
                    chrt_id: i64::try_from(i).unwrap(),
                    name: format!("item-{i}"),
                    price: 100,
                    total_price: 100,
                    ..Item::default()
                })
                .collect(),
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: chrono::DateTime::default(),
            oof_shard: "1".to_string(),
        }
    }

    fn put(cache: &OrderCache, order: Order) {
        cache.set(order.uid().unwrap(), order);
    }

    #[test]
    fn test_set_then_get() {
        let cache = OrderCache::new();
        let o = order("order001", 2);
        put(&cache, o.clone());

        assert_eq!(cache.get("order001"), Some(o));
        assert_eq!(cache.snapshot().len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let cache = OrderCache::new();
        assert!(cache.get("unknown").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_replaces_wholesale() {
        let cache = OrderCache::new();
        put(&cache, order("order001", 3));

        let mut replacement = order("order001", 0);
        replacement.track_number = "NEW".to_string();
        put(&cache, replacement.clone());

        assert_eq!(cache.get("order001"), Some(replacement));
        assert_eq!(cache.len(), 1);
        let snapshot = cache.snapshot();
        assert_eq!(
            snapshot.iter().filter(|o| o.order_uid == "order001").count(),
            1
        );
    }

    #[test]
    fn test_delete() {
        let cache = OrderCache::new();
        put(&cache, order("order001", 1));

        assert!(cache.delete("order001"));
        assert!(cache.get("order001").is_none());
        // No-op the second time
        assert!(!cache.delete("order001"));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let cache = OrderCache::new();
        put(&cache, order("a", 0));
        put(&cache, order("b", 0));

        let snapshot = cache.snapshot();
        put(&cache, order("c", 0));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_clones_share_the_table() {
        let cache = OrderCache::new();
        let handle = cache.clone();
        put(&handle, order("order001", 0));
        assert!(cache.get("order001").is_some());
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_aggregate() {
        let cache = OrderCache::new();
        let small = order("order001", 1);
        let large = {
            let mut o = order("order001", 50);
            o.track_number = "LARGE".to_string();
            o
        };
        put(&cache, small.clone());

        let writer = {
            let cache = cache.clone();
            let (small, large) = (small.clone(), large.clone());
            thread::spawn(move || {
                for i in 0..500 {
                    let next = if i % 2 == 0 { large.clone() } else { small.clone() };
                    put(&cache, next);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let (small, large) = (small.clone(), large.clone());
                thread::spawn(move || {
                    for _ in 0..500 {
                        let seen = cache.get("order001").unwrap();
                        assert!(seen == small || seen == large);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
