//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::OrderCache;
use crate::db::OrderStore;
use crate::query::OrderQueryService;

/// Application state shared across all handlers.
///
/// Cheap to clone. The cache inside is the same instance the intake consumer
/// writes to.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn OrderStore>,
    cache: OrderCache,
    query: OrderQueryService,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `store` - Durable order store
    /// * `cache` - Shared order cache
    /// * `query_timeout` - Bound on the store fetch behind a cache miss
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, cache: OrderCache, query_timeout: Duration) -> Self {
        let query = OrderQueryService::new(Arc::clone(&store), cache.clone(), query_timeout);

        Self {
            inner: Arc::new(AppStateInner {
                store,
                cache,
                query,
            }),
        }
    }

    /// Get a reference to the order store.
    #[must_use]
    pub fn store(&self) -> &dyn OrderStore {
        self.inner.store.as_ref()
    }

    /// Get a reference to the order cache.
    #[must_use]
    pub fn cache(&self) -> &OrderCache {
        &self.inner.cache
    }

    /// Get a reference to the read-through query service.
    #[must_use]
    pub fn query(&self) -> &OrderQueryService {
        &self.inner.query
    }
}
