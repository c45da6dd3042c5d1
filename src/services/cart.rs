//! Cart aggregate.
//!
//! A cart is read, modified in memory and written back whole. Every write
//! is a compare-and-swap on the cart's `revision`, so two writers racing on
//! the same cart produce one success and one [`ServiceError::Conflict`]
//! instead of a lost update. Pricing is recomputed on every save.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::api::metrics::{record_cart_conflict, record_cart_created};
use crate::config::CartConfig;
use crate::db::{
    format_timestamp, now_timestamp, round_money, Cart, CartItem, CartOwner, CartRow, CartStatus,
    MenuItem, Pricing,
};

use super::error::{ServiceError, ServiceResult};

/// Addresses one cart line, by position or by its stable id.
///
/// Positions shift when an earlier line is removed; line ids never do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    Index(usize),
    Line(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddItemRequest {
    pub menu_item: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub customizations: String,
    pub special_instructions: Option<String>,
    pub expected_revision: Option<i64>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: Option<u32>,
    pub customizations: Option<String>,
    pub special_instructions: Option<String>,
    pub expected_revision: Option<i64>,
}

/// Sum line subtotals, add rounded tax and subtract the discount
pub fn compute_pricing(items: &[CartItem], discount: Decimal, tax_rate: Decimal) -> Pricing {
    let subtotal: Decimal = items.iter().map(|item| item.subtotal).sum();
    let tax = round_money(subtotal * tax_rate);
    let total = (subtotal + tax - discount).max(Decimal::ZERO);
    Pricing {
        subtotal,
        tax,
        discount,
        total,
    }
}

/// Merge a new line into `items`.
///
/// A line with the same menu item and identical customizations absorbs the
/// quantity; anything else is appended.
pub fn merge_line(items: &mut Vec<CartItem>, line: CartItem) -> ServiceResult<()> {
    let existing = items
        .iter_mut()
        .find(|item| item.menu_item == line.menu_item && item.customizations == line.customizations);

    match existing {
        Some(item) => {
            item.quantity = item
                .quantity
                .checked_add(line.quantity)
                .ok_or_else(|| ServiceError::validation("quantity", "Quantity is too large"))?;
            if line.special_instructions.is_some() {
                item.special_instructions = line.special_instructions;
            }
            item.recompute_subtotal();
        }
        None => items.push(line),
    }
    Ok(())
}

pub fn resolve_index(items: &[CartItem], item: &ItemRef) -> ServiceResult<usize> {
    match item {
        ItemRef::Index(index) if *index < items.len() => Ok(*index),
        ItemRef::Index(index) => Err(ServiceError::InvalidIndex {
            index: *index,
            len: items.len(),
        }),
        ItemRef::Line(line_id) => items
            .iter()
            .position(|i| &i.line_id == line_id)
            .ok_or_else(|| ServiceError::UnknownLine(line_id.clone())),
    }
}

fn validate_quantity(quantity: u32) -> ServiceResult<()> {
    if quantity == 0 {
        return Err(ServiceError::validation("quantity", "Quantity must be at least 1"));
    }
    Ok(())
}

fn check_revision(cart: &Cart, expected: Option<i64>) -> ServiceResult<()> {
    match expected {
        Some(expected) if expected != cart.revision => Err(ServiceError::Conflict(format!(
            "Cart is at revision {}, not {}",
            cart.revision, expected
        ))),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct CartService {
    db: SqlitePool,
    tax_rate: Decimal,
    expiry: Duration,
}

impl CartService {
    pub fn new(db: SqlitePool, tax_rate: Decimal, expiry: Duration) -> Self {
        Self {
            db,
            tax_rate,
            expiry,
        }
    }

    pub fn from_config(db: SqlitePool, config: &CartConfig) -> Self {
        Self::new(db, config.tax_rate, Duration::hours(config.expiry_hours))
    }

    fn next_expiry(&self) -> String {
        format_timestamp(Utc::now() + self.expiry)
    }

    /// Return the owner's active cart for a restaurant, creating it if needed
    pub async fn get_or_create_cart(
        &self,
        restaurant_id: &str,
        owner: &CartOwner,
    ) -> ServiceResult<Cart> {
        if let Some(cart) = self.get_active_cart(restaurant_id, owner).await? {
            return Ok(cart);
        }

        let restaurant: Option<(bool,)> =
            sqlx::query_as("SELECT is_active FROM restaurants WHERE id = ?")
                .bind(restaurant_id)
                .fetch_optional(&self.db)
                .await?;
        match restaurant {
            None => return Err(ServiceError::NotFound("restaurant")),
            Some((false,)) => {
                return Err(ServiceError::validation(
                    "restaurant_id",
                    "Restaurant is not accepting orders",
                ))
            }
            Some((true,)) => {}
        }

        let now = now_timestamp();
        let cart = Cart {
            id: uuid::Uuid::new_v4().to_string(),
            restaurant_id: restaurant_id.to_string(),
            user_id: owner.user_id().map(str::to_string),
            session_id: owner.session_id().map(str::to_string),
            owner_key: owner.key(),
            items: Vec::new(),
            pricing: Pricing::default(),
            coupon_code: None,
            discount_amount: Decimal::ZERO,
            status: CartStatus::Active,
            expires_at: self.next_expiry(),
            revision: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO carts (id, restaurant_id, user_id, session_id, owner_key, items, pricing, coupon_code, discount_amount, status, expires_at, revision, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cart.id)
        .bind(&cart.restaurant_id)
        .bind(&cart.user_id)
        .bind(&cart.session_id)
        .bind(&cart.owner_key)
        .bind(serde_json::to_string(&cart.items)?)
        .bind(serde_json::to_string(&cart.pricing)?)
        .bind(&cart.coupon_code)
        .bind(cart.discount_amount.to_string())
        .bind(cart.status.as_str())
        .bind(&cart.expires_at)
        .bind(cart.revision)
        .bind(&cart.created_at)
        .bind(&cart.updated_at)
        .execute(&self.db)
        .await;

        match inserted {
            Ok(_) => {
                record_cart_created();
                tracing::info!(cart_id = %cart.id, restaurant_id = %restaurant_id, "Cart created");
                Ok(cart)
            }
            // Lost the race against a concurrent create for the same owner
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tracing::debug!(restaurant_id = %restaurant_id, "Concurrent cart creation, reusing winner");
                self.get_active_cart(restaurant_id, owner)
                    .await?
                    .ok_or_else(|| ServiceError::Conflict("Active cart changed concurrently".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the owner's active cart without creating one.
    ///
    /// A cart found past its expiry is marked expired and not returned.
    pub async fn get_active_cart(
        &self,
        restaurant_id: &str,
        owner: &CartOwner,
    ) -> ServiceResult<Option<Cart>> {
        let row = sqlx::query_as::<_, CartRow>(
            "SELECT * FROM carts WHERE restaurant_id = ? AND owner_key = ? AND status = 'active'",
        )
        .bind(restaurant_id)
        .bind(owner.key())
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let cart = Cart::try_from(row)?;
        if cart.expires_at <= now_timestamp() {
            self.expire(&cart).await?;
            return Ok(None);
        }
        Ok(Some(cart))
    }

    pub async fn get_cart(&self, cart_id: &str) -> ServiceResult<Cart> {
        let row = sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE id = ?")
            .bind(cart_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ServiceError::NotFound("cart"))?;
        Ok(Cart::try_from(row)?)
    }

    pub async fn add_item(&self, cart_id: &str, req: AddItemRequest) -> ServiceResult<Cart> {
        validate_quantity(req.quantity)?;

        let menu_item = sqlx::query_as::<_, MenuItem>("SELECT * FROM menu_items WHERE id = ?")
            .bind(&req.menu_item)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ServiceError::validation("menu_item", "Menu item does not exist"))?;
        if !menu_item.is_available {
            return Err(ServiceError::validation(
                "menu_item",
                "Menu item is not available",
            ));
        }

        let mut line = CartItem {
            line_id: uuid::Uuid::new_v4().to_string(),
            menu_item: menu_item.id.clone(),
            name: menu_item.name.clone(),
            quantity: req.quantity,
            price: menu_item.price,
            customizations: req.customizations,
            special_instructions: req.special_instructions,
            subtotal: Decimal::ZERO,
        };
        line.recompute_subtotal();

        self.mutate(cart_id, req.expected_revision, move |cart| {
            if menu_item.restaurant_id != cart.restaurant_id {
                return Err(ServiceError::validation(
                    "menu_item",
                    "Menu item belongs to another restaurant",
                ));
            }
            merge_line(&mut cart.items, line)
        })
        .await
    }

    pub async fn update_item(
        &self,
        cart_id: &str,
        item: ItemRef,
        req: UpdateItemRequest,
    ) -> ServiceResult<Cart> {
        if let Some(quantity) = req.quantity {
            validate_quantity(quantity)?;
        }

        self.mutate(cart_id, req.expected_revision, move |cart| {
            let index = resolve_index(&cart.items, &item)?;
            let line = &mut cart.items[index];
            if let Some(quantity) = req.quantity {
                line.quantity = quantity;
            }
            if let Some(customizations) = req.customizations {
                line.customizations = customizations;
            }
            if req.special_instructions.is_some() {
                line.special_instructions = req.special_instructions;
            }
            line.recompute_subtotal();
            Ok(())
        })
        .await
    }

    pub async fn remove_item(
        &self,
        cart_id: &str,
        item: ItemRef,
        expected_revision: Option<i64>,
    ) -> ServiceResult<Cart> {
        self.mutate(cart_id, expected_revision, move |cart| {
            let index = resolve_index(&cart.items, &item)?;
            cart.items.remove(index);
            Ok(())
        })
        .await
    }

    pub async fn clear_cart(&self, cart_id: &str, expected_revision: Option<i64>) -> ServiceResult<Cart> {
        self.mutate(cart_id, expected_revision, |cart| {
            cart.items.clear();
            Ok(())
        })
        .await
    }

    /// Store a coupon code. Discount amounts are set by an external pricing step.
    pub async fn apply_coupon(
        &self,
        cart_id: &str,
        code: &str,
        expected_revision: Option<i64>,
    ) -> ServiceResult<Cart> {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return Err(ServiceError::validation("code", "Coupon code is required"));
        }

        self.mutate(cart_id, expected_revision, move |cart| {
            cart.coupon_code = Some(code);
            Ok(())
        })
        .await
    }

    /// Mark every active cart past its expiry as expired
    pub async fn expire_stale_carts(&self) -> ServiceResult<u64> {
        let now = now_timestamp();
        let result = sqlx::query(
            "UPDATE carts SET status = 'expired', revision = revision + 1, updated_at = ? WHERE status = 'active' AND expires_at <= ?",
        )
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire(&self, cart: &Cart) -> ServiceResult<()> {
        sqlx::query(
            "UPDATE carts SET status = 'expired', revision = revision + 1, updated_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(now_timestamp())
        .bind(&cart.id)
        .execute(&self.db)
        .await?;
        tracing::info!(cart_id = %cart.id, "Cart expired");
        Ok(())
    }

    /// Read, modify and compare-and-swap a cart
    async fn mutate<F>(&self, cart_id: &str, expected_revision: Option<i64>, f: F) -> ServiceResult<Cart>
    where
        F: FnOnce(&mut Cart) -> ServiceResult<()> + Send,
    {
        let mut cart = self.get_cart(cart_id).await?;
        if cart.status != CartStatus::Active {
            return Err(ServiceError::InvalidTransition(format!(
                "Cart is {} and can no longer change",
                cart.status
            )));
        }
        if cart.expires_at <= now_timestamp() {
            self.expire(&cart).await?;
            return Err(ServiceError::InvalidTransition("Cart has expired".to_string()));
        }
        check_revision(&cart, expected_revision)?;

        f(&mut cart)?;
        self.save(cart).await
    }

    async fn save(&self, mut cart: Cart) -> ServiceResult<Cart> {
        cart.pricing = compute_pricing(&cart.items, cart.discount_amount, self.tax_rate);
        let read_revision = cart.revision;
        cart.revision += 1;
        cart.updated_at = now_timestamp();
        cart.expires_at = self.next_expiry();

        let result = sqlx::query(
            r#"
            UPDATE carts
            SET items = ?, pricing = ?, coupon_code = ?, discount_amount = ?, expires_at = ?, revision = ?, updated_at = ?
            WHERE id = ? AND revision = ? AND status = 'active'
            "#,
        )
        .bind(serde_json::to_string(&cart.items)?)
        .bind(serde_json::to_string(&cart.pricing)?)
        .bind(&cart.coupon_code)
        .bind(cart.discount_amount.to_string())
        .bind(&cart.expires_at)
        .bind(cart.revision)
        .bind(&cart.updated_at)
        .bind(&cart.id)
        .bind(read_revision)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            record_cart_conflict();
            tracing::warn!(cart_id = %cart.id, revision = read_revision, "Cart write lost a concurrent update race");
            return Err(ServiceError::Conflict(
                "Cart was modified concurrently, reload and retry".to_string(),
            ));
        }

        tracing::info!(
            cart_id = %cart.id,
            revision = cart.revision,
            items = cart.items.len(),
            total = %cart.pricing.total,
            "Cart updated"
        );
        Ok(cart)
    }
}
