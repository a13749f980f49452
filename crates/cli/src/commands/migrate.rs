//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! ob-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `BROKER_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Broker migrations: `crates/broker/migrations/`
//!
//! ```text
//! migrations/
//! ├── 20260301000001_create_orders.sql
//! ├── 20260301000002_create_delivery.sql
//! ├── 20260301000003_create_payment.sql
//! └── 20260301000004_create_items.sql
//! ```

use secrecy::SecretString;
use thiserror::Error;
use tracing::info;

use order_broker::db;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run the broker database migrations.
///
/// # Errors
///
/// Returns `MigrationError` if the database URL is missing, the connection
/// fails, or a migration fails to apply.
pub async fn run() -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("BROKER_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| MigrationError::MissingEnvVar("BROKER_DATABASE_URL"))?;

    info!("Connecting to broker database...");
    let pool = db::create_pool(&database_url).await?;

    info!("Running broker migrations...");
    db::run_migrations(&pool).await?;

    info!("Broker migrations complete");
    Ok(())
}
