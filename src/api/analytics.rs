use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::services::analytics::{resolve_scope, DashboardStats, RevenueReport};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(alias = "restaurantId")]
    pub restaurant_id: Option<String>,
    pub days: Option<i64>,
    /// Accepted for dashboard compatibility; figures are not localized
    #[allow(dead_code)]
    pub locale: Option<String>,
}

/// GET /api/analytics/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<DashboardStats>, ApiError> {
    let scope = resolve_scope(&user, query.restaurant_id.as_deref())?;
    Ok(Json(state.analytics.dashboard_stats(&scope).await?))
}

/// GET /api/analytics/revenue - daily buckets ending today
pub async fn revenue(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<RevenueReport>, ApiError> {
    let scope = resolve_scope(&user, query.restaurant_id.as_deref())?;
    Ok(Json(state.analytics.revenue(&scope, query.days).await?))
}
