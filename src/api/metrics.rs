//! Prometheus metrics endpoint and HTTP request tracking middleware.
//!
//! This module provides:
//! - A `/metrics` endpoint that returns Prometheus-formatted metrics
//! - Middleware for tracking HTTP request counts and durations
//! - Helper functions the services use to record cart and order events

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

// Metric names as constants for consistency
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const CARTS_CREATED_TOTAL: &str = "carts_created_total";
pub const ORDERS_CREATED_TOTAL: &str = "orders_created_total";
pub const CART_CONFLICTS_TOTAL: &str = "cart_conflicts_total";
pub const CARTS_ACTIVE: &str = "carts_active";
pub const CACHE_ENTRIES: &str = "query_cache_entries";

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Call once during startup; a second install fails.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_counter!(CARTS_CREATED_TOTAL, "Total number of carts created");
    describe_counter!(ORDERS_CREATED_TOTAL, "Total number of orders created at checkout");
    describe_counter!(
        CART_CONFLICTS_TOTAL,
        "Cart writes rejected because the cart changed concurrently"
    );
    describe_gauge!(CARTS_ACTIVE, "Number of active carts");
    describe_gauge!(CACHE_ENTRIES, "Number of entries in the query cache");

    Ok(handle)
}

/// GET /metrics - Returns Prometheus-formatted metrics.
///
/// This endpoint is accessible without authentication.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    if let Ok(count) =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM carts WHERE status = 'active'")
            .fetch_one(&state.db)
            .await
    {
        gauge!(CARTS_ACTIVE).set(count as f64);
    }

    gauge!(CACHE_ENTRIES).set(state.cache.len() as f64);
}

/// Middleware to track HTTP request metrics.
///
/// Records:
/// - `http_requests_total` counter with method, path, and status labels
/// - `http_request_duration_seconds` histogram with method and path labels
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Use the matched route template (e.g. /api/carts/:id) to bound label cardinality
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_cart_created() {
    counter!(CARTS_CREATED_TOTAL).increment(1);
}

/// Record an order, labelled by its type
pub fn record_order_created(order_type: &'static str) {
    counter!(ORDERS_CREATED_TOTAL, "order_type" => order_type).increment(1);
}

pub fn record_cart_conflict() {
    counter!(CART_CONFLICTS_TOTAL).increment(1);
}
