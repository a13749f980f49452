//! `OrderRepository` against a real database.
//!
//! These tests require a `PostgreSQL` database reachable at `DATABASE_URL`.
//! Migrations are applied by the test itself.
//!
//! Run with: cargo test -p order-broker-integration-tests -- --ignored

#![allow(clippy::unwrap_used)]

use order_broker::db::{self, OrderRepository, OrderStore, RepositoryError};
use order_broker_core::OrderUid;
use order_broker_integration_tests::sample_order;
use secrecy::SecretString;

async fn repository() -> OrderRepository {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::create_pool(&SecretString::from(url)).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    OrderRepository::new(pool)
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_round_trip_with_and_without_items() {
    let repo = repository().await;
    repo.ping().await.unwrap();

    for (uid, items) in [("pg-roundtrip-0", 0), ("pg-roundtrip-3", 3)] {
        let order = sample_order(uid, items);
        repo.insert_order(&order).await.unwrap();

        let fetched = repo
            .get_full_order(&OrderUid::parse(uid).unwrap())
            .await
            .unwrap();
        assert_eq!(fetched, order);
    }
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_reinsert_replaces_whole_aggregate() {
    let repo = repository().await;

    repo.insert_order(&sample_order("pg-replace", 3)).await.unwrap();

    let mut updated = sample_order("pg-replace", 1);
    updated.delivery.city = "Haifa".to_string();
    updated.payment.amount = 42;
    repo.insert_order(&updated).await.unwrap();

    let fetched = repo
        .get_full_order(&OrderUid::parse("pg-replace").unwrap())
        .await
        .unwrap();
    assert_eq!(fetched, updated);

    let all = repo.get_all_orders().await.unwrap();
    assert_eq!(all.iter().filter(|o| o.order_uid == "pg-replace").count(), 1);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_missing_order_is_not_found() {
    let repo = repository().await;

    let result = repo
        .get_full_order(&OrderUid::parse("pg-does-not-exist").unwrap())
        .await;
    assert!(matches!(result, Err(RepositoryError::NotFound)));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_blank_uid_is_rejected_before_writing() {
    let repo = repository().await;

    let result = repo.insert_order(&sample_order("", 1)).await;
    assert!(matches!(result, Err(RepositoryError::InvalidOrder(_))));
}
