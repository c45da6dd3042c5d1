mod analytics;
pub mod auth;
mod carts;
mod checkout;
pub mod error;
mod menu_items;
pub mod metrics;
mod orders;
mod restaurants;
pub(crate) mod validation;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::db::query::ListParams;
use crate::AppState;

/// Query string accepted by list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub page: Option<i64>,
    pub locale: Option<String>,
    pub restaurant_id: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
}

impl ListQuery {
    pub fn to_params(&self) -> ListParams {
        ListParams {
            filter: None,
            sort: self.sort.clone(),
            limit: self.limit,
            page: self.page,
            locale: self.locale.clone(),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    // Storefront: guests allowed, ownership checked per cart
    let cart_routes = Router::new()
        .route("/", post(carts::get_or_create_cart))
        .route("/active", get(carts::get_active_cart))
        .route("/:id", get(carts::get_cart))
        .route("/:id/items", post(carts::add_item).delete(carts::clear_cart))
        .route(
            "/:id/items/:index",
            patch(carts::update_item).delete(carts::remove_item),
        )
        .route(
            "/:id/lines/:line_id",
            patch(carts::update_line).delete(carts::remove_line),
        )
        .route("/:id/coupon", post(carts::apply_coupon));

    let api_routes = Router::new()
        // Restaurants and menus
        .route(
            "/restaurants",
            get(restaurants::list_restaurants).post(restaurants::create_restaurant),
        )
        .route(
            "/restaurants/:id",
            get(restaurants::get_restaurant)
                .patch(restaurants::update_restaurant)
                .delete(restaurants::delete_restaurant),
        )
        .route("/restaurants/:id/menu", get(restaurants::get_menu))
        .route("/menu-items", post(menu_items::create_menu_item))
        .route(
            "/menu-items/:id",
            patch(menu_items::update_menu_item).delete(menu_items::delete_menu_item),
        )
        // Checkout and orders
        .route("/checkout", post(checkout::checkout))
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", patch(orders::update_order_status))
        .route(
            "/orders/:id/items/:index/status",
            patch(orders::update_item_status),
        )
        // Analytics
        .route("/analytics/stats", get(analytics::stats))
        .route("/analytics/revenue", get(analytics::revenue))
        .nest("/auth", auth_routes)
        .nest("/carts", cart_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api", api_routes)
        .route_layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::cart::tests::{create_menu_item, create_restaurant};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        pool: crate::DbPool,
    }

    async fn app() -> TestApp {
        let pool = crate::db::init_memory().await.unwrap();
        let state = Arc::new(AppState::new(Config::default(), pool.clone()));
        TestApp {
            router: create_router(state),
            pool,
        }
    }

    impl TestApp {
        async fn send(
            &self,
            method: &str,
            uri: &str,
            cookie: Option<&str>,
            bearer: Option<&str>,
            body: Option<Value>,
        ) -> Response {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(cookie) = cookie {
                builder = builder.header(header::COOKIE, cookie);
            }
            if let Some(token) = bearer {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            self.router.clone().oneshot(request).await.unwrap()
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// `name=value` of the first Set-Cookie header
    fn issued_cookie(response: &Response) -> String {
        let value = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        value.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let response = app.send("GET", "/health", None, None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_guest_cart_checkout_flow() {
        let app = app().await;
        let restaurant = create_restaurant(&app.pool, "Blue Door").await;
        let pasta = create_menu_item(&app.pool, &restaurant, "Pasta", Decimal::from(10)).await;

        let response = app
            .send("POST", "/api/carts", None, None, Some(json!({ "restaurant_id": restaurant })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = issued_cookie(&response);
        assert!(cookie.starts_with("cart_session_id="));
        let cart = json_body(response).await;
        let cart_id = cart["id"].as_str().unwrap().to_string();

        let response = app
            .send(
                "POST",
                &format!("/api/carts/{}/items", cart_id),
                Some(&cookie),
                None,
                Some(json!({ "menu_item": pasta, "quantity": 2 })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let cart = json_body(response).await;
        assert_eq!(cart["summary"]["item_count"], 2);
        assert_eq!(cart["revision"], 1);

        // A different guest cannot see the cart
        let response = app
            .send("GET", &format!("/api/carts/{}", cart_id), Some("cart_session_id=other"), None, None)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let checkout = json!({
            "cart_id": cart_id,
            "customer": { "name": "Ada", "phone": "555-0100" },
            "order_type": "takeaway",
            "payment_method": "cash"
        });
        let response = app
            .send("POST", "/api/checkout", Some(&cookie), None, Some(checkout.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let order = json_body(response).await;
        assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));
        assert_eq!(order["status"], "pending");

        // The converted cart cannot be checked out again
        let response = app
            .send("POST", "/api/checkout", Some(&cookie), None, Some(checkout))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cart_errors_use_envelope() {
        let app = app().await;
        let restaurant = create_restaurant(&app.pool, "Blue Door").await;
        let response = app
            .send("POST", "/api/carts", None, None, Some(json!({ "restaurant_id": restaurant })))
            .await;
        let cookie = issued_cookie(&response);
        let cart_id = json_body(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .send(
                "DELETE",
                &format!("/api/carts/{}/items/3", cart_id),
                Some(&cookie),
                None,
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_protected_routes_need_auth() {
        let app = app().await;
        for uri in ["/api/orders", "/api/analytics/stats", "/api/auth/me"] {
            let response = app.send("GET", uri, None, None, None).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_register_then_me_with_bearer() {
        let app = app().await;
        let response = app
            .send(
                "POST",
                "/api/auth/register",
                None,
                None,
                Some(json!({ "email": "ada@example.com", "password": "hunter22a", "name": "Ada" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        let token = body["token"].as_str().unwrap().to_string();

        let response = app.send("GET", "/api/auth/me", None, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["email"], "ada@example.com");

        // Customers have no restaurant to report on
        let response = app
            .send("GET", "/api/analytics/stats", None, Some(&token), None)
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Nor may they create restaurants
        let response = app
            .send("POST", "/api/restaurants", None, Some(&token), Some(json!({ "name": "Mine" })))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_public_restaurant_listing() {
        let app = app().await;
        create_restaurant(&app.pool, "Blue Door").await;
        let response = app.send("GET", "/api/restaurants?limit=5", None, None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let page = json_body(response).await;
        assert_eq!(page["total_docs"], 1);
        assert_eq!(page["limit"], 5);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let app = app().await;
        let response = app.send("GET", "/metrics", None, None, None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
