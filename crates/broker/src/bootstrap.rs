//! Startup cache warm.

use std::time::Duration;

use order_broker_core::OrderUidError;
use thiserror::Error;
use tracing::info;

use crate::cache::OrderCache;
use crate::db::{OrderStore, RepositoryError};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("loading orders timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to load orders: {0}")]
    Store(#[from] RepositoryError),

    #[error("stored order has an invalid id: {0}")]
    InvalidOrder(#[from] OrderUidError),
}

/// Load every stored order into `cache`.
///
/// Returns the number of orders loaded.
///
/// # Errors
///
/// Returns `BootstrapError` if the store fails, does not finish within
/// `timeout`, or returns an order without a usable identifier.
pub async fn warm_cache(
    store: &dyn OrderStore,
    cache: &OrderCache,
    timeout: Duration,
) -> Result<usize, BootstrapError> {
    let orders = tokio::time::timeout(timeout, store.get_all_orders())
        .await
        .map_err(|_| BootstrapError::Timeout(timeout))??;

    let count = orders.len();
    for order in orders {
        let uid = order.uid()?;
        cache.set(uid, order);
    }

    info!(count, "Cache loaded from store");
    Ok(count)
}
