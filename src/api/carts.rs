//! Cart endpoints.
//!
//! Signed-in callers own carts by user id. Guests are identified by the
//! cart session cookie, which is issued on first contact.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::access::is_admin;
use crate::db::{Cart, CartOwner, CartResponse, User};
use crate::services::{AddItemRequest, ItemRef, UpdateItemRequest};
use crate::AppState;

use super::auth::{generate_token, MaybeUser};
use super::error::ApiError;
use super::validation::validate_coupon_code;

/// Who is calling, for cart ownership
pub struct CartCaller {
    pub user: Option<User>,
    pub session: Option<String>,
    /// Cookie to send back when a guest session was just issued
    issued: Option<Cookie<'static>>,
}

impl CartCaller {
    pub fn owner(&self) -> CartOwner {
        match (&self.user, &self.session) {
            (Some(user), _) => CartOwner::User(user.id.clone()),
            (None, Some(session)) => CartOwner::Session(session.clone()),
            // The extractor always issues a session for guests
            (None, None) => CartOwner::Session(String::new()),
        }
    }

    /// Whether the caller may see and modify `cart`
    pub fn can_see(&self, cart: &Cart) -> bool {
        if let Some(owner) = &cart.user_id {
            return match &self.user {
                Some(user) => &user.id == owner || is_admin(Some(user)),
                None => false,
            };
        }
        match (&cart.session_id, &self.session) {
            (Some(expected), Some(given)) => expected.as_bytes().ct_eq(given.as_bytes()).into(),
            _ => false,
        }
    }

    /// Fail with 404 for carts the caller may not see
    pub fn check(&self, cart: &Cart) -> Result<(), ApiError> {
        if self.can_see(cart) {
            return Ok(());
        }
        tracing::warn!(
            cart_id = %cart.id,
            user_id = self.user.as_ref().map(|u| u.id.as_str()),
            "Cart access denied"
        );
        Err(ApiError::not_found("Cart not found"))
    }

    /// Cookie jar carrying a freshly issued session cookie, if any
    pub fn jar(&self) -> CookieJar {
        match &self.issued {
            Some(cookie) => CookieJar::new().add(cookie.clone()),
            None => CookieJar::new(),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CartCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let MaybeUser(user) = MaybeUser::from_request_parts(parts, state).await?;
        let cookie_name = &state.config.cart.session_cookie;
        let session = CookieJar::from_headers(&parts.headers)
            .get(cookie_name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());

        if user.is_some() || session.is_some() {
            return Ok(Self {
                user,
                session,
                issued: None,
            });
        }

        let session = generate_token();
        let cookie = Cookie::build((cookie_name.clone(), session.clone()))
            .path("/")
            .http_only(true)
            .secure(state.config.auth.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::hours(state.config.cart.expiry_hours))
            .build();

        Ok(Self {
            user: None,
            session: Some(session),
            issued: Some(cookie),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CartRequest {
    pub restaurant_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RevisionQuery {
    pub expected_revision: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CouponRequest {
    pub code: String,
    pub expected_revision: Option<i64>,
}

type CartReply = Result<(CookieJar, Json<CartResponse>), ApiError>;

fn reply(caller: &CartCaller, cart: Cart) -> CartReply {
    Ok((caller.jar(), Json(CartResponse::from(cart))))
}

async fn load_visible(state: &AppState, caller: &CartCaller, cart_id: &str) -> Result<Cart, ApiError> {
    let cart = state.carts.get_cart(cart_id).await?;
    caller.check(&cart)?;
    Ok(cart)
}

/// POST /api/carts - the caller's active cart for a restaurant, created if needed
pub async fn get_or_create_cart(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Json(req): Json<CartRequest>,
) -> CartReply {
    let cart = state
        .carts
        .get_or_create_cart(&req.restaurant_id, &caller.owner())
        .await?;
    reply(&caller, cart)
}

/// GET /api/carts/active?restaurant_id=
pub async fn get_active_cart(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Query(req): Query<CartRequest>,
) -> Result<(CookieJar, Json<Option<CartResponse>>), ApiError> {
    let cart = state
        .carts
        .get_active_cart(&req.restaurant_id, &caller.owner())
        .await?;
    Ok((caller.jar(), Json(cart.map(CartResponse::from))))
}

pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Path(id): Path<String>,
) -> CartReply {
    let cart = load_visible(&state, &caller, &id).await?;
    reply(&caller, cart)
}

pub async fn add_item(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Path(id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> CartReply {
    load_visible(&state, &caller, &id).await?;
    let cart = state.carts.add_item(&id, req).await?;
    reply(&caller, cart)
}

pub async fn update_item(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Path((id, index)): Path<(String, usize)>,
    Json(req): Json<UpdateItemRequest>,
) -> CartReply {
    load_visible(&state, &caller, &id).await?;
    let cart = state.carts.update_item(&id, ItemRef::Index(index), req).await?;
    reply(&caller, cart)
}

pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Path((id, index)): Path<(String, usize)>,
    Query(query): Query<RevisionQuery>,
) -> CartReply {
    load_visible(&state, &caller, &id).await?;
    let cart = state
        .carts
        .remove_item(&id, ItemRef::Index(index), query.expected_revision)
        .await?;
    reply(&caller, cart)
}

pub async fn update_line(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Path((id, line_id)): Path<(String, String)>,
    Json(req): Json<UpdateItemRequest>,
) -> CartReply {
    load_visible(&state, &caller, &id).await?;
    let cart = state.carts.update_item(&id, ItemRef::Line(line_id), req).await?;
    reply(&caller, cart)
}

pub async fn remove_line(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Path((id, line_id)): Path<(String, String)>,
    Query(query): Query<RevisionQuery>,
) -> CartReply {
    load_visible(&state, &caller, &id).await?;
    let cart = state
        .carts
        .remove_item(&id, ItemRef::Line(line_id), query.expected_revision)
        .await?;
    reply(&caller, cart)
}

/// DELETE /api/carts/:id/items - remove every line
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Path(id): Path<String>,
    Query(query): Query<RevisionQuery>,
) -> CartReply {
    load_visible(&state, &caller, &id).await?;
    let cart = state.carts.clear_cart(&id, query.expected_revision).await?;
    reply(&caller, cart)
}

pub async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    caller: CartCaller,
    Path(id): Path<String>,
    Json(req): Json<CouponRequest>,
) -> CartReply {
    validate_coupon_code(&req.code).map_err(|e| ApiError::validation_field("code", e))?;
    load_visible(&state, &caller, &id).await?;
    let cart = state
        .carts
        .apply_coupon(&id, &req.code, req.expected_revision)
        .await?;
    reply(&caller, cart)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CartStatus, Pricing};
    use rust_decimal::Decimal;

    fn cart(user_id: Option<&str>, session_id: Option<&str>) -> Cart {
        Cart {
            id: "c1".to_string(),
            restaurant_id: "r1".to_string(),
            user_id: user_id.map(str::to_string),
            session_id: session_id.map(str::to_string),
            owner_key: String::new(),
            items: Vec::new(),
            pricing: Pricing::default(),
            coupon_code: None,
            discount_amount: Decimal::ZERO,
            status: CartStatus::Active,
            expires_at: String::new(),
            revision: 0,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            name: id.to_string(),
            roles: Vec::new(),
            restaurants: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn caller(user: Option<User>, session: Option<&str>) -> CartCaller {
        CartCaller {
            user,
            session: session.map(str::to_string),
            issued: None,
        }
    }

    #[test]
    fn test_guest_cart_visible_to_matching_session_only() {
        let guest_cart = cart(None, Some("s1"));
        assert!(caller(None, Some("s1")).can_see(&guest_cart));
        assert!(!caller(None, Some("s2")).can_see(&guest_cart));
        assert!(!caller(None, Some("s")).can_see(&guest_cart));
        assert!(!caller(Some(user("u1")), None).can_see(&guest_cart));
    }

    #[test]
    fn test_user_cart_visible_to_owner_only() {
        let user_cart = cart(Some("u1"), None);
        assert!(caller(Some(user("u1")), None).can_see(&user_cart));
        assert!(!caller(Some(user("u2")), None).can_see(&user_cart));
        assert!(!caller(None, Some("u1")).can_see(&user_cart));
        assert!(caller(None, Some("s1")).check(&user_cart).is_err());
    }

    #[test]
    fn test_owner_prefers_user() {
        let c = caller(Some(user("u1")), Some("s1"));
        assert_eq!(c.owner(), CartOwner::User("u1".to_string()));
        let c = caller(None, Some("s1"));
        assert_eq!(c.owner(), CartOwner::Session("s1".to_string()));
    }
}
