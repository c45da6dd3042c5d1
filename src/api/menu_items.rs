use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::access::{can_access_restaurant, require_permission};
use crate::db::{CreateMenuItemRequest, MenuItem, UpdateMenuItemRequest, User};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

fn check_menu(user: &User, action: &str, restaurant_id: &str) -> Result<(), ApiError> {
    require_permission(Some(user), action, "menu-items")?;
    if !can_access_restaurant(Some(user), restaurant_id) {
        return Err(ApiError::forbidden("Restaurant is not assigned to you"));
    }
    Ok(())
}

pub async fn create_menu_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(mut req): Json<CreateMenuItemRequest>,
) -> Result<(StatusCode, Json<MenuItem>), ApiError> {
    check_menu(&user, "create", &req.restaurant_id)?;
    req.created_by = Some(user.id.clone());
    let item = state.menu_items.create(req).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_menu_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateMenuItemRequest>,
) -> Result<Json<MenuItem>, ApiError> {
    let existing = state.menu_items.require(&id).await?;
    check_menu(&user, "update", &existing.restaurant_id)?;
    Ok(Json(state.menu_items.update(&id, req).await?))
}

pub async fn delete_menu_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let existing = state.menu_items.require(&id).await?;
    check_menu(&user, "delete", &existing.restaurant_id)?;
    state.menu_items.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
