//! End-to-end intake tests: partition log in, store and cache out.
//!
//! Restarts are modelled by dropping the consumer and opening a new reader on
//! the same [`MemoryLog`], which resumes from the committed position.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use order_broker::cache::OrderCache;
use order_broker::db::OrderStore;
use order_broker::intake::{IntakeConsumer, IntakeError, PollOutcome};
use order_broker::query::OrderQueryService;
use order_broker_core::Order;
use order_broker_integration_tests::{
    MemoryLog, MemoryOrderStore, MemoryStream, fast_intake_config, sample_order,
};
use tokio_util::sync::CancellationToken;

fn consumer(
    log: &MemoryLog,
    store: &Arc<MemoryOrderStore>,
    cache: &OrderCache,
) -> IntakeConsumer<MemoryStream> {
    IntakeConsumer::new(
        log.open(),
        Arc::clone(store) as Arc<dyn OrderStore>,
        cache.clone(),
        fast_intake_config(),
    )
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_valid_order_is_stored_cached_and_committed() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    let order = sample_order("b563feb7b2b84b6test", 1);
    log.append_order(&order);

    let mut intake = consumer(&log, &store, &cache);
    let outcome = intake.poll_once().await;

    assert!(matches!(outcome, PollOutcome::Committed(ref uid) if uid.as_str() == "b563feb7b2b84b6test"));
    assert_eq!(store.stored("b563feb7b2b84b6test"), Some(order.clone()));
    assert_eq!(cache.get("b563feb7b2b84b6test"), Some(order));
    assert_eq!(log.committed(), Some(1));
}

#[tokio::test]
async fn test_ingested_order_is_served_from_cache() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    let order = sample_order("order001", 2);
    log.append_order(&order);

    let mut intake = consumer(&log, &store, &cache);
    assert!(matches!(intake.poll_once().await, PollOutcome::Committed(_)));

    let query = OrderQueryService::new(
        Arc::clone(&store) as Arc<dyn OrderStore>,
        cache.clone(),
        Duration::from_secs(1),
    );
    assert_eq!(query.get_order("order001").await.unwrap(), order);
    assert_eq!(store.lookups(), 0);
}

#[tokio::test]
async fn test_empty_partition_is_idle() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    let mut intake = consumer(&log, &store, &cache);
    assert!(matches!(intake.poll_once().await, PollOutcome::Idle));
    assert_eq!(log.committed(), None);
    assert_eq!(store.insert_attempts(), 0);
}

#[tokio::test]
async fn test_orders_apply_in_partition_order() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    for uid in ["order001", "order002", "order003"] {
        log.append_order(&sample_order(uid, 2));
    }

    let mut intake = consumer(&log, &store, &cache);
    for _ in 0..3 {
        assert!(matches!(intake.poll_once().await, PollOutcome::Committed(_)));
    }

    assert_eq!(store.len(), 3);
    assert_eq!(cache.len(), 3);
    assert_eq!(log.committed(), Some(3));
}

// =============================================================================
// Unprocessable messages
// =============================================================================

#[tokio::test]
async fn test_missing_uid_is_redelivered_after_restart() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    let mut invalid = sample_order("", 1);
    invalid.payment.transaction = "order004".to_string();

    log.append_order(&sample_order("order001", 1));
    log.append(Some("order004_invalid"), serde_json::to_vec(&invalid).unwrap());
    log.append_order(&sample_order("order003", 1));

    let mut intake = consumer(&log, &store, &cache);
    assert!(matches!(intake.poll_once().await, PollOutcome::Committed(_)));
    assert!(matches!(
        intake.poll_once().await,
        PollOutcome::Abandoned(IntakeError::Validation(_))
    ));
    assert!(matches!(intake.poll_once().await, PollOutcome::Committed(_)));

    // The later order is applied, but the position stays on the invalid one.
    assert!(store.stored("order003").is_some());
    assert_eq!(log.committed(), Some(1));
    assert_eq!(store.len(), 2);
    assert_eq!(cache.len(), 2);
    drop(intake);

    // Restart: the invalid message comes back, the valid ones are unaffected.
    let mut intake = consumer(&log, &store, &cache);
    assert!(matches!(
        intake.poll_once().await,
        PollOutcome::Abandoned(IntakeError::Validation(_))
    ));
    assert!(matches!(intake.poll_once().await, PollOutcome::Committed(_)));

    assert_eq!(store.len(), 2);
    assert_eq!(cache.len(), 2);
    assert!(cache.get("").is_none());
    assert_eq!(log.committed(), Some(1));
}

#[tokio::test]
async fn test_undecodable_payload_is_abandoned() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    log.append(Some("garbage"), b"{not json".to_vec());
    // Delivery and payment are required.
    log.append(Some("partial"), br#"{"order_uid":"order009"}"#.to_vec());

    let mut intake = consumer(&log, &store, &cache);
    for _ in 0..2 {
        assert!(matches!(
            intake.poll_once().await,
            PollOutcome::Abandoned(IntakeError::Decode(_))
        ));
    }

    assert_eq!(store.insert_attempts(), 0);
    assert!(cache.is_empty());
    assert_eq!(log.committed(), None);
}

#[tokio::test]
async fn test_skip_policy_acknowledges_unprocessable() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    log.append(Some("garbage"), b"not json".to_vec());
    log.append_order(&sample_order("order002", 0));

    let mut config = fast_intake_config();
    config.skip_unprocessable = true;
    let mut intake = IntakeConsumer::new(
        log.open(),
        Arc::clone(&store) as Arc<dyn OrderStore>,
        cache.clone(),
        config,
    );

    assert!(matches!(intake.poll_once().await, PollOutcome::Skipped(_)));
    assert!(matches!(intake.poll_once().await, PollOutcome::Committed(_)));
    assert_eq!(log.committed(), Some(2));
    assert_eq!(store.len(), 1);
}

// =============================================================================
// Store failures
// =============================================================================

#[tokio::test]
async fn test_store_outage_retries_without_commit() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    let order = sample_order("order001", 2);
    log.append_order(&order);
    store.set_unavailable(true);

    let mut intake = consumer(&log, &store, &cache);
    for _ in 0..3 {
        assert!(matches!(
            intake.poll_once().await,
            PollOutcome::Retrying(IntakeError::Persist(_))
        ));
        assert!(cache.is_empty());
        assert_eq!(log.committed(), None);
    }

    store.set_unavailable(false);
    assert!(matches!(intake.poll_once().await, PollOutcome::Committed(_)));

    assert_eq!(store.insert_attempts(), 4);
    assert_eq!(store.stored("order001"), Some(order.clone()));
    assert_eq!(cache.get("order001"), Some(order));
    assert_eq!(log.committed(), Some(1));
}

#[tokio::test]
async fn test_slow_store_times_out_and_retries() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    log.append_order(&sample_order("order001", 1));
    store.set_write_delay(Some(Duration::from_secs(5)));

    let mut intake = consumer(&log, &store, &cache);
    assert!(matches!(
        intake.poll_once().await,
        PollOutcome::Retrying(IntakeError::PersistTimeout(_))
    ));
    assert!(cache.is_empty());
    assert!(store.is_empty());

    store.set_write_delay(None);
    assert!(matches!(intake.poll_once().await, PollOutcome::Committed(_)));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_read_failure_backs_off_and_recovers() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    log.append_order(&sample_order("order001", 1));
    log.fail_reads(2);

    let mut intake = consumer(&log, &store, &cache);
    assert!(matches!(intake.poll_once().await, PollOutcome::ReadFailed(_)));
    assert!(matches!(intake.poll_once().await, PollOutcome::ReadFailed(_)));
    assert!(matches!(intake.poll_once().await, PollOutcome::Committed(_)));
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_reingestion_replaces_aggregate() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    let first = sample_order("order001", 3);
    let mut second = sample_order("order001", 1);
    second.track_number = "TRACK-UPDATED".to_string();

    log.append_order(&first);
    log.append_order(&second);

    let mut intake = consumer(&log, &store, &cache);
    intake.poll_once().await;
    intake.poll_once().await;

    let stored: Order = store.stored("order001").unwrap();
    assert_eq!(stored, second);
    assert_eq!(stored.items.len(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(cache.snapshot(), vec![second]);
}

// =============================================================================
// Run loop
// =============================================================================

#[tokio::test]
async fn test_run_drains_log_and_stops_on_cancel() {
    let log = MemoryLog::new();
    let store = MemoryOrderStore::new();
    let cache = OrderCache::new();

    for uid in ["order001", "order002"] {
        log.append_order(&sample_order(uid, 1));
    }

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(consumer(&log, &store, &cache).run(shutdown.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while cache.len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown.cancel();
    let stream = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stream.next_offset(), 2);
    assert_eq!(log.committed(), Some(2));
    assert_eq!(store.len(), 2);
}
