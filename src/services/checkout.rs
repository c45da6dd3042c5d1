//! Checkout: turn an active cart into an order.
//!
//! The order insert and the cart's `active -> converted` transition commit
//! together or not at all. A converted cart never yields a second order.

use chrono::Utc;
use rand::{distr::Alphanumeric, Rng};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::api::metrics::record_order_created;
use crate::api::validation::validate_email;
use crate::db::{
    now_timestamp, Cart, CartStatus, CustomerInfo, DeliveryAddress, KitchenStatus, Order,
    OrderItem, OrderPayload, OrderStatus, OrderType, PaymentMethod, PaymentStatus,
};

use super::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutRequest {
    pub cart_id: String,
    pub customer: Option<CustomerInfo>,
    pub order_type: Option<OrderType>,
    pub payment_method: Option<PaymentMethod>,
    pub table_id: Option<String>,
    pub delivery_address: Option<DeliveryAddress>,
    pub notes: Option<String>,
    pub expected_revision: Option<i64>,
}

/// Checkout details after required-field validation
#[derive(Debug, Clone)]
pub struct CheckoutDetails {
    pub customer: CustomerInfo,
    pub order_type: OrderType,
    pub payment_method: PaymentMethod,
    pub table_id: Option<String>,
    pub delivery_address: Option<DeliveryAddress>,
    pub notes: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CheckoutRequest {
    pub fn validate(&self) -> ServiceResult<CheckoutDetails> {
        let customer = self
            .customer
            .clone()
            .ok_or_else(|| ServiceError::validation("customer", "Customer details are required"))?;

        let name = customer.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::validation("customer.name", "Customer name is required"));
        }
        let email = non_blank(customer.email);
        let phone = non_blank(customer.phone);
        if email.is_none() && phone.is_none() {
            return Err(ServiceError::validation(
                "customer.email",
                "An email address or phone number is required",
            ));
        }
        if let Some(email) = &email {
            validate_email(email).map_err(|e| ServiceError::validation("customer.email", e))?;
        }

        let order_type = self
            .order_type
            .ok_or_else(|| ServiceError::validation("order_type", "Order type is required"))?;
        let payment_method = self
            .payment_method
            .ok_or_else(|| ServiceError::validation("payment_method", "Payment method is required"))?;

        if order_type == OrderType::Delivery && self.delivery_address.is_none() {
            return Err(ServiceError::validation(
                "delivery_address",
                "Delivery orders need a delivery address",
            ));
        }

        Ok(CheckoutDetails {
            customer: CustomerInfo { name, email, phone },
            order_type,
            payment_method,
            table_id: non_blank(self.table_id.clone()),
            delivery_address: self.delivery_address.clone(),
            notes: non_blank(self.notes.clone()),
        })
    }
}

/// Project a cart into an order payload.
///
/// Pricing is copied verbatim from the cart. The table is kept only for
/// dine-in orders and the address only for delivery.
pub fn project_order(cart: &Cart, details: CheckoutDetails) -> OrderPayload {
    let items = cart
        .items
        .iter()
        .map(|item| OrderItem {
            menu_item: item.menu_item.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            price: item.price,
            customizations: item.customizations.clone(),
            special_instructions: item.special_instructions.clone(),
            subtotal: item.subtotal,
            kitchen_status: KitchenStatus::Pending,
        })
        .collect();

    OrderPayload {
        restaurant: cart.restaurant_id.clone(),
        cart: cart.id.clone(),
        user: cart.user_id.clone(),
        customer: details.customer,
        order_type: details.order_type,
        table: details
            .table_id
            .filter(|_| details.order_type == OrderType::DineIn),
        delivery_address: details
            .delivery_address
            .filter(|_| details.order_type == OrderType::Delivery),
        items,
        pricing: cart.pricing,
        coupon_code: cart.coupon_code.clone(),
        notes: details.notes,
        payment_method: details.payment_method,
    }
}

/// `ORD-YYYYMMDD-XXXXXX`
pub fn generate_order_number() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

/// Create an order from a cart and convert the cart, atomically
pub async fn create_order_from_cart(db: &SqlitePool, req: CheckoutRequest) -> ServiceResult<Order> {
    let row = sqlx::query_as::<_, crate::db::CartRow>("SELECT * FROM carts WHERE id = ?")
        .bind(&req.cart_id)
        .fetch_optional(db)
        .await?
        .ok_or(ServiceError::NotFound("cart"))?;
    let cart = Cart::try_from(row)?;

    if cart.items.is_empty() {
        return Err(ServiceError::EmptyCart);
    }
    if cart.status != CartStatus::Active {
        return Err(ServiceError::InvalidTransition(format!(
            "Cart is {} and cannot be checked out",
            cart.status
        )));
    }
    if cart.expires_at <= now_timestamp() {
        return Err(ServiceError::InvalidTransition("Cart has expired".to_string()));
    }
    if let Some(expected) = req.expected_revision {
        if expected != cart.revision {
            return Err(ServiceError::Conflict(format!(
                "Cart is at revision {}, not {}",
                cart.revision, expected
            )));
        }
    }
    let details = req.validate()?;
    let payload = project_order(&cart, details);

    let now = now_timestamp();
    let order = Order {
        id: uuid::Uuid::new_v4().to_string(),
        order_number: generate_order_number(),
        restaurant_id: payload.restaurant,
        cart_id: payload.cart,
        user_id: payload.user,
        customer: payload.customer,
        order_type: payload.order_type,
        table_id: payload.table,
        delivery_address: payload.delivery_address,
        items: payload.items,
        pricing: payload.pricing,
        coupon_code: payload.coupon_code,
        notes: payload.notes,
        payment_method: payload.payment_method,
        payment_status: PaymentStatus::Pending,
        status: OrderStatus::Pending,
        revision: 0,
        created_at: now.clone(),
        updated_at: now,
    };

    let delivery_address = order
        .delivery_address
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let mut tx = db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO orders (id, order_number, restaurant_id, cart_id, user_id, customer, order_type, table_id, delivery_address, items, pricing, coupon_code, notes, payment_method, payment_status, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&order.id)
    .bind(&order.order_number)
    .bind(&order.restaurant_id)
    .bind(&order.cart_id)
    .bind(&order.user_id)
    .bind(serde_json::to_string(&order.customer)?)
    .bind(order.order_type.as_str())
    .bind(&order.table_id)
    .bind(delivery_address)
    .bind(serde_json::to_string(&order.items)?)
    .bind(serde_json::to_string(&order.pricing)?)
    .bind(&order.coupon_code)
    .bind(&order.notes)
    .bind(order.payment_method.as_str())
    .bind(order.payment_status.as_str())
    .bind(order.status.as_str())
    .bind(&order.created_at)
    .bind(&order.updated_at)
    .execute(&mut *tx)
    .await?;

    let converted = sqlx::query(
        "UPDATE carts SET status = 'converted', revision = revision + 1, updated_at = ? WHERE id = ? AND revision = ? AND status = 'active'",
    )
    .bind(&order.created_at)
    .bind(&cart.id)
    .bind(cart.revision)
    .execute(&mut *tx)
    .await?;

    if converted.rows_affected() == 0 {
        // Dropping the transaction rolls back the order insert
        tracing::warn!(cart_id = %cart.id, "Cart changed during checkout");
        return Err(ServiceError::Conflict(
            "Cart was modified during checkout, reload and retry".to_string(),
        ));
    }

    tx.commit().await?;

    record_order_created(order.order_type.as_str());
    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        cart_id = %cart.id,
        restaurant_id = %order.restaurant_id,
        total = %order.pricing.total,
        "Order created from cart"
    );
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CartOwner;
    use crate::services::cart::tests::{add, fixture};
    use rust_decimal::Decimal;

    fn owner() -> CartOwner {
        CartOwner::Session("guest-1".to_string())
    }

    fn request(cart_id: &str, order_type: OrderType) -> CheckoutRequest {
        CheckoutRequest {
            cart_id: cart_id.to_string(),
            customer: Some(CustomerInfo {
                name: "Ada".to_string(),
                email: Some("ada@example.com".to_string()),
                phone: None,
            }),
            order_type: Some(order_type),
            payment_method: Some(PaymentMethod::Card),
            table_id: Some("T4".to_string()),
            delivery_address: Some(DeliveryAddress {
                street: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                postal_code: None,
                notes: None,
            }),
            notes: None,
            expected_revision: None,
        }
    }

    async fn order_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_cart_fails_without_writes() {
        let f = fixture().await;
        let cart = f.carts.get_or_create_cart(&f.restaurant, &owner()).await.unwrap();

        let result = create_order_from_cart(&f.pool, request(&cart.id, OrderType::Takeaway)).await;
        assert!(matches!(result, Err(ServiceError::EmptyCart)));
        assert_eq!(order_count(&f.pool).await, 0);

        let stored = f.carts.get_cart(&cart.id).await.unwrap();
        assert_eq!(stored.status, CartStatus::Active);
        assert_eq!(stored.revision, cart.revision);
    }

    #[tokio::test]
    async fn test_checkout_converts_cart() {
        let f = fixture().await;
        let cart = f.carts.get_or_create_cart(&f.restaurant, &owner()).await.unwrap();
        f.carts.add_item(&cart.id, add(&f.menu[0], 2)).await.unwrap();
        let cart = f.carts.add_item(&cart.id, add(&f.menu[1], 1)).await.unwrap();

        let order = create_order_from_cart(&f.pool, request(&cart.id, OrderType::Takeaway))
            .await
            .unwrap();
        assert_eq!(order.pricing, cart.pricing);
        assert_eq!(order.pricing.subtotal, Decimal::from(25));
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.order_number.starts_with("ORD-"));
        assert!(order
            .items
            .iter()
            .all(|i| i.kitchen_status == KitchenStatus::Pending));
        assert_eq!(order_count(&f.pool).await, 1);

        let stored = f.carts.get_cart(&cart.id).await.unwrap();
        assert_eq!(stored.status, CartStatus::Converted);
        assert!(f.carts.get_active_cart(&f.restaurant, &owner()).await.unwrap().is_none());

        // A converted cart neither mutates nor checks out again
        assert!(matches!(
            f.carts.add_item(&cart.id, add(&f.menu[0], 1)).await,
            Err(ServiceError::InvalidTransition(_))
        ));
        assert!(matches!(
            create_order_from_cart(&f.pool, request(&cart.id, OrderType::Takeaway)).await,
            Err(ServiceError::InvalidTransition(_))
        ));
        assert_eq!(order_count(&f.pool).await, 1);

        let next = f.carts.get_or_create_cart(&f.restaurant, &owner()).await.unwrap();
        assert_ne!(next.id, cart.id);
    }

    #[tokio::test]
    async fn test_stale_revision_rolls_back() {
        let f = fixture().await;
        let cart = f.carts.get_or_create_cart(&f.restaurant, &owner()).await.unwrap();
        let cart = f.carts.add_item(&cart.id, add(&f.menu[0], 1)).await.unwrap();

        let mut req = request(&cart.id, OrderType::Takeaway);
        req.expected_revision = Some(cart.revision - 1);
        assert!(matches!(
            create_order_from_cart(&f.pool, req).await,
            Err(ServiceError::Conflict(_))
        ));
        assert_eq!(order_count(&f.pool).await, 0);
    }

    #[tokio::test]
    async fn test_missing_fields_are_reported() {
        let f = fixture().await;
        let cart = f.carts.get_or_create_cart(&f.restaurant, &owner()).await.unwrap();
        f.carts.add_item(&cart.id, add(&f.menu[0], 1)).await.unwrap();

        let mut req = request(&cart.id, OrderType::Takeaway);
        req.payment_method = None;
        assert!(matches!(
            create_order_from_cart(&f.pool, req).await,
            Err(ServiceError::Validation { field, .. }) if field == "payment_method"
        ));

        let mut req = request(&cart.id, OrderType::Takeaway);
        req.customer = Some(CustomerInfo {
            name: "Ada".to_string(),
            email: None,
            phone: Some("  ".to_string()),
        });
        assert!(matches!(
            create_order_from_cart(&f.pool, req).await,
            Err(ServiceError::Validation { field, .. }) if field == "customer.email"
        ));
        assert_eq!(order_count(&f.pool).await, 0);
    }

    #[tokio::test]
    async fn test_expired_cart_is_not_checked_out() {
        let f = fixture().await;
        let cart = f.carts.get_or_create_cart(&f.restaurant, &owner()).await.unwrap();
        f.carts.add_item(&cart.id, add(&f.menu[0], 1)).await.unwrap();
        sqlx::query("UPDATE carts SET expires_at = '2000-01-01T00:00:00Z' WHERE id = ?")
            .bind(&cart.id)
            .execute(&f.pool)
            .await
            .unwrap();

        assert!(matches!(
            create_order_from_cart(&f.pool, request(&cart.id, OrderType::Takeaway)).await,
            Err(ServiceError::InvalidTransition(_))
        ));
        assert_eq!(order_count(&f.pool).await, 0);
    }

    #[test]
    fn test_customer_email_uses_shared_validator() {
        let mut req = request("c1", OrderType::Takeaway);
        req.customer = Some(CustomerInfo {
            name: "Ada".to_string(),
            email: Some("ada@example".to_string()),
            phone: Some("555-0100".to_string()),
        });
        assert!(matches!(
            req.validate(),
            Err(ServiceError::Validation { field, .. }) if field == "customer.email"
        ));

        let mut req = request("c1", OrderType::Takeaway);
        req.customer = Some(CustomerInfo {
            name: "Ada".to_string(),
            email: Some(" ada@example.com ".to_string()),
            phone: None,
        });
        assert_eq!(
            req.validate().unwrap().customer.email.as_deref(),
            Some("ada@example.com")
        );
    }

    #[tokio::test]
    async fn test_unknown_cart() {
        let f = fixture().await;
        assert!(matches!(
            create_order_from_cart(&f.pool, request("nope", OrderType::Takeaway)).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delivery_payload_has_address_and_no_table() {
        let f = fixture().await;
        let cart = f.carts.get_or_create_cart(&f.restaurant, &owner()).await.unwrap();
        f.carts.add_item(&cart.id, add(&f.menu[0], 2)).await.unwrap();
        let cart = f.carts.add_item(&cart.id, add(&f.menu[1], 1)).await.unwrap();

        let details = request(&cart.id, OrderType::Delivery).validate().unwrap();
        let payload = serde_json::to_value(project_order(&cart, details)).unwrap();
        assert!(payload.get("delivery_address").is_some());
        assert!(payload.get("table").is_none());

        let details = request(&cart.id, OrderType::DineIn).validate().unwrap();
        let payload = serde_json::to_value(project_order(&cart, details)).unwrap();
        assert_eq!(payload["table"], "T4");
        assert!(payload.get("delivery_address").is_none());
    }

    #[test]
    fn test_order_number_format() {
        let number = generate_order_number();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
