use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::db::Order;
use crate::services::{create_order_from_cart, CheckoutRequest};
use crate::AppState;

use super::carts::CartCaller;
use super::error::ApiError;

/// POST /api/checkout - convert the caller's cart into an order
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let cart = state.carts.get_cart(&req.cart_id).await?;
    caller.check(&cart)?;

    let order = create_order_from_cart(&state.db, req).await?;
    state.orders.invalidate(None);
    Ok((StatusCode::CREATED, Json(order)))
}
