use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::access::{can_access_restaurant, require_permission, restaurant_scoped_or_owned, Access};
use crate::db::query::Where;
use crate::db::{KitchenStatus, Order, Page, UpdateOrderRequest, User};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;
use super::ListQuery;

#[derive(Debug, Deserialize)]
pub struct KitchenStatusRequest {
    pub status: KitchenStatus,
    #[serde(default)]
    pub expected_revision: Option<i64>,
}

fn read_access(user: &User) -> Access {
    restaurant_scoped_or_owned(Some(user), "restaurant_id", "user_id")
}

fn field_of(order: &Order, field: &str) -> Option<String> {
    match field {
        "restaurant_id" => Some(order.restaurant_id.clone()),
        "user_id" => order.user_id.clone(),
        "status" => Some(order.status.to_string()),
        _ => None,
    }
}

/// Load an order the caller may read; others look missing
async fn load_readable(state: &AppState, user: &User, id: &str) -> Result<Order, ApiError> {
    let order = state.orders.require(id).await?;
    if !read_access(user).permits(&|field| field_of(&order, field)) {
        return Err(ApiError::not_found("Order not found"));
    }
    Ok(order)
}

/// Staff writes need the permission and the order's restaurant
fn check_writable(user: &User, order: &Order) -> Result<(), ApiError> {
    require_permission(Some(user), "update", "orders")?;
    if !can_access_restaurant(Some(user), &order.restaurant_id) {
        return Err(ApiError::forbidden("Order belongs to another restaurant"));
    }
    Ok(())
}

/// GET /api/orders - own orders plus those of assigned restaurants
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Order>>, ApiError> {
    let mut params = query.to_params();
    if let Some(status) = query.status {
        params = params.with_filter(Where::equals("status", status));
    }
    if let Some(restaurant_id) = query.restaurant_id {
        params = params.with_filter(Where::equals("restaurant_id", restaurant_id));
    }
    if let Some(scope) = read_access(&user).into_filter()? {
        params = params.with_filter(scope);
    }

    Ok(Json(state.orders.list(&params).await?))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(load_readable(&state, &user, &id).await?))
}

/// PATCH /api/orders/:id/status - order status and payment status
pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = load_readable(&state, &user, &id).await?;
    check_writable(&user, &order)?;

    let updated = state.orders.update(&id, req).await?;
    tracing::info!(
        order_id = %updated.id,
        status = %updated.status,
        user_id = %user.id,
        "Order updated"
    );
    Ok(Json(updated))
}

/// PATCH /api/orders/:id/items/:index/status - kitchen progress of one line
pub async fn update_item_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path((id, index)): Path<(String, usize)>,
    Json(req): Json<KitchenStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = load_readable(&state, &user, &id).await?;
    check_writable(&user, &order)?;

    let updated = state
        .orders
        .update(
            &id,
            UpdateOrderRequest {
                kitchen: Some((index, req.status)),
                expected_revision: req.expected_revision,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(updated))
}
