use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::access::{can_access_restaurant, has_permission, is_admin, require_permission};
use crate::db::query::Where;
use crate::db::{
    assign_restaurant, CreateRestaurantRequest, MenuItem, Page, Restaurant,
    UpdateRestaurantRequest, User,
};
use crate::AppState;

use super::auth::{CurrentUser, MaybeUser};
use super::error::ApiError;
use super::ListQuery;

/// Staff who can edit restaurants also see inactive ones and unavailable items
fn sees_everything(user: Option<&User>) -> bool {
    has_permission(user, "update", "restaurants")
}

pub async fn list_restaurants(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Restaurant>>, ApiError> {
    let mut params = query.to_params();
    if !sees_everything(user.as_ref()) {
        params = params.with_filter(Where::equals("is_active", "1"));
    }
    Ok(Json(state.restaurants.list(&params).await?))
}

pub async fn get_restaurant(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> Result<Json<Restaurant>, ApiError> {
    let restaurant = state.restaurants.require(&id).await?;
    if !restaurant.is_active && !sees_everything(user.as_ref()) {
        return Err(ApiError::not_found("Restaurant not found"));
    }
    Ok(Json(restaurant))
}

/// GET /api/restaurants/:id/menu
pub async fn get_menu(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<MenuItem>>, ApiError> {
    let restaurant = state.restaurants.require(&id).await?;
    let everything = sees_everything(user.as_ref());
    if !restaurant.is_active && !everything {
        return Err(ApiError::not_found("Restaurant not found"));
    }

    let mut params = query.to_params();
    if params.sort.is_none() {
        params.sort = Some("name".to_string());
    }
    params = params.with_filter(Where::equals("restaurant_id", restaurant.id));
    if let Some(category) = query.category {
        params = params.with_filter(Where::equals("category", category));
    }
    if !everything {
        params = params.with_filter(Where::equals("is_available", "1"));
    }
    Ok(Json(state.menu_items.list(&params).await?))
}

/// POST /api/restaurants - the creator is assigned to the new restaurant
pub async fn create_restaurant(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(mut req): Json<CreateRestaurantRequest>,
) -> Result<(StatusCode, Json<Restaurant>), ApiError> {
    require_permission(Some(&user), "create", "restaurants")?;
    req.created_by = Some(user.id.clone());

    let restaurant = state.restaurants.create(req).await?;
    if !is_admin(Some(&user)) {
        assign_restaurant(&state.db, &user.id, &restaurant.id).await?;
    }

    Ok((StatusCode::CREATED, Json(restaurant)))
}

fn check_restaurant(user: &User, action: &str, restaurant_id: &str) -> Result<(), ApiError> {
    require_permission(Some(user), action, "restaurants")?;
    if !can_access_restaurant(Some(user), restaurant_id) {
        return Err(ApiError::forbidden("Restaurant is not assigned to you"));
    }
    Ok(())
}

pub async fn update_restaurant(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateRestaurantRequest>,
) -> Result<Json<Restaurant>, ApiError> {
    check_restaurant(&user, "update", &id)?;
    let restaurant = state.restaurants.update(&id, req).await?;
    Ok(Json(restaurant))
}

pub async fn delete_restaurant(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_restaurant(&user, "delete", &id)?;
    state.restaurants.delete(&id).await?;
    // Menu items go with the restaurant
    state.menu_items.invalidate(None);
    Ok(StatusCode::NO_CONTENT)
}
