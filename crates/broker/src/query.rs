//! Read-through order lookups.
//!
//! The cache answers first. On a miss the store is consulted under a timeout,
//! and a found order is written back into the cache before it is returned.

use std::sync::Arc;
use std::time::Duration;

use order_broker_core::{Order, OrderUid, OrderUidError};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cache::OrderCache;
use crate::db::{OrderStore, RepositoryError};

/// Lookup failures.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The identifier is blank or otherwise unusable.
    #[error("invalid order id: {0}")]
    InvalidId(#[from] OrderUidError),

    /// Neither the cache nor the store could produce this order.
    ///
    /// A store failure or timeout on a cache miss also lands here; the real
    /// cause is logged, not returned.
    #[error("order not found: {0}")]
    NotFound(OrderUid),
}

/// Cache-first order lookup with store fallback.
#[derive(Clone)]
pub struct OrderQueryService {
    store: Arc<dyn OrderStore>,
    cache: OrderCache,
    store_timeout: Duration,
}

impl OrderQueryService {
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, cache: OrderCache, store_timeout: Duration) -> Self {
        Self {
            store,
            cache,
            store_timeout,
        }
    }

    /// Look up one order by identifier.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidId` for a blank identifier (whatever the
    /// cache holds) and `QueryError::NotFound` if the order is in neither the
    /// cache nor the store, or if the store failed to answer a cache miss.
    #[instrument(skip(self))]
    pub async fn get_order(&self, id: &str) -> Result<Order, QueryError> {
        let uid = OrderUid::parse(id)?;

        if let Some(order) = self.cache.get(uid.as_str()) {
            debug!("Cache hit");
            return Ok(order);
        }
        debug!("Cache miss, querying store");

        let Ok(fetched) =
            tokio::time::timeout(self.store_timeout, self.store.get_full_order(&uid)).await
        else {
            warn!(timeout = ?self.store_timeout, "Store lookup timed out, reporting not found");
            return Err(QueryError::NotFound(uid));
        };

        match fetched {
            Ok(order) => {
                self.cache.set(uid, order.clone());
                Ok(order)
            }
            Err(RepositoryError::NotFound) => Err(QueryError::NotFound(uid)),
            Err(e) => {
                warn!(error = %e, "Store lookup failed, reporting not found");
                Err(QueryError::NotFound(uid))
            }
        }
    }

    /// The cache this service reads through.
    #[must_use]
    pub const fn cache(&self) -> &OrderCache {
        &self.cache
    }
}
