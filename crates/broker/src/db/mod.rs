//! Durable order store.
//!
//! # Database: `orders`
//!
//! PostgreSQL is the system of record. Each order aggregate spans four tables:
//!
//! ## Tables
//!
//! - `orders` - Header row, primary key `order_uid`
//! - `delivery` - One row per order
//! - `payment` - One row per order
//! - `items` - Zero or more rows per order, in producer order
//!
//! # Migrations
//!
//! Migrations are stored in `crates/broker/migrations/` and run via:
//! ```bash
//! cargo run -p order-broker-cli -- migrate
//! ```

pub mod orders;

use std::time::Duration;

use async_trait::async_trait;
use order_broker_core::{Order, OrderUid, OrderUidError};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use orders::OrderRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// The order cannot be stored because its identifier is invalid.
    #[error("invalid order: {0}")]
    InvalidOrder(#[from] OrderUidError),
}

/// Durable order storage.
///
/// Implementations must make [`OrderStore::insert_order`] all-or-nothing: a
/// reader never observes a header without its delivery, payment, and items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;

    /// Fetch one complete aggregate.
    ///
    /// Returns `RepositoryError::NotFound` if no order has this identifier.
    async fn get_full_order(&self, uid: &OrderUid) -> Result<Order, RepositoryError>;

    /// Insert an aggregate, replacing any existing order with the same
    /// identifier, in a single transaction.
    async fn insert_order(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Fetch every stored aggregate.
    async fn get_all_orders(&self) -> Result<Vec<Order>, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Apply the embedded migrations in `crates/broker/migrations/`.
///
/// # Errors
///
/// Returns `MigrateError` if a migration fails or the history is inconsistent.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
