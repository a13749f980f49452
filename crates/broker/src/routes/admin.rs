//! Cache administration.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use tracing::info;

use crate::error::{AppError, Result};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub entries: usize,
}

/// Number of orders currently cached.
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(CacheStats {
        entries: state.cache().len(),
    })
}

/// Remove one order from the cache. The store is not touched.
pub async fn evict(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> Result<StatusCode> {
    if state.cache().delete(&order_uid) {
        info!(order_uid = %order_uid, "Evicted order from cache");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("cached order {order_uid}")))
    }
}
