//! Cart models.
//!
//! A cart is a mutable pre-order aggregate scoped to one restaurant and one
//! owner (a user or a guest session). Items and pricing are stored as JSON
//! documents on the cart row.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::{parse_decimal, parse_json, Pricing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartStatus {
    Active,
    Abandoned,
    Converted,
    Expired,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CartStatus::Active => "active",
            CartStatus::Abandoned => "abandoned",
            CartStatus::Converted => "converted",
            CartStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CartStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CartStatus::Active),
            "abandoned" => Ok(CartStatus::Abandoned),
            "converted" => Ok(CartStatus::Converted),
            "expired" => Ok(CartStatus::Expired),
            _ => Err(format!("Unknown cart status: {}", s)),
        }
    }
}

/// Who a cart belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CartOwner {
    User(String),
    Session(String),
}

impl CartOwner {
    /// Key used by the one-active-cart-per-owner unique index
    pub fn key(&self) -> String {
        match self {
            CartOwner::User(id) => format!("user:{}", id),
            CartOwner::Session(id) => format!("session:{}", id),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            CartOwner::User(id) => Some(id),
            CartOwner::Session(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            CartOwner::Session(id) => Some(id),
            CartOwner::User(_) => None,
        }
    }
}

/// A cart line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Stable identifier, unaffected by removals of other lines
    pub line_id: String,
    pub menu_item: String,
    /// Menu item name at add time
    pub name: String,
    pub quantity: u32,
    /// Unit price snapshot at add time
    pub price: Decimal,
    #[serde(default)]
    pub customizations: String,
    #[serde(default)]
    pub special_instructions: Option<String>,
    pub subtotal: Decimal,
}

impl CartItem {
    pub fn recompute_subtotal(&mut self) {
        self.subtotal = self.price * Decimal::from(self.quantity);
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CartRow {
    pub id: String,
    pub restaurant_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub owner_key: String,
    pub items: String,
    pub pricing: String,
    pub coupon_code: Option<String>,
    pub discount_amount: String,
    pub status: String,
    pub expires_at: String,
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    pub restaurant_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(skip)]
    pub owner_key: String,
    pub items: Vec<CartItem>,
    pub pricing: Pricing,
    pub coupon_code: Option<String>,
    pub discount_amount: Decimal,
    pub status: CartStatus,
    pub expires_at: String,
    /// Incremented on every write; used for compare-and-swap updates
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<CartRow> for Cart {
    type Error = sqlx::Error;

    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: e.into(),
        })?;

        Ok(Self {
            items: parse_json("items", &row.items)?,
            pricing: parse_json("pricing", &row.pricing)?,
            discount_amount: parse_decimal("discount_amount", &row.discount_amount)?,
            status,
            id: row.id,
            restaurant_id: row.restaurant_id,
            user_id: row.user_id,
            session_id: row.session_id,
            owner_key: row.owner_key,
            coupon_code: row.coupon_code,
            expires_at: row.expires_at,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl Cart {
    pub fn is_owned_by(&self, owner: &CartOwner) -> bool {
        self.owner_key == owner.key()
    }

    pub fn summary(&self) -> CartSummary {
        CartSummary::from(self)
    }
}

/// Derived values shown next to a cart, read from the stored pricing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CartSummary {
    pub item_count: u32,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl From<&Cart> for CartSummary {
    fn from(cart: &Cart) -> Self {
        Self {
            item_count: cart.items.iter().map(|i| i.quantity).sum(),
            subtotal: cart.pricing.subtotal,
            tax: cart.pricing.tax,
            discount: cart.pricing.discount,
            total: cart.pricing.total,
        }
    }
}

/// Cart plus its summary, as returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct CartResponse {
    #[serde(flatten)]
    pub cart: Cart,
    pub summary: CartSummary,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        let summary = cart.summary();
        Self { cart, summary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_keys_do_not_collide() {
        let user = CartOwner::User("abc".to_string());
        let session = CartOwner::Session("abc".to_string());
        assert_ne!(user.key(), session.key());
        assert_eq!(user.user_id(), Some("abc"));
        assert_eq!(session.session_id(), Some("abc"));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            CartStatus::Active,
            CartStatus::Abandoned,
            CartStatus::Converted,
            CartStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<CartStatus>().unwrap(), status);
        }
        assert!("open".parse::<CartStatus>().is_err());
    }
}
