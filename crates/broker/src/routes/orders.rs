//! Order lookup handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use order_broker_core::Order;

use crate::error::Result;
use crate::state::AppState;

/// Return one order aggregate.
///
/// 400 for a blank id, 404 if the order is unknown or the store cannot
/// answer a cache miss.
pub async fn show(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> Result<Json<Order>> {
    let order = state.query().get_order(&order_uid).await?;
    Ok(Json(order))
}

/// `/v1/orders/` with nothing after the slash.
pub async fn blank(State(state): State<AppState>) -> Result<Json<Order>> {
    let order = state.query().get_order("").await?;
    Ok(Json(order))
}
