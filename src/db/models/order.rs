//! Order models.
//!
//! An order owns a snapshot of the cart it was created from: items,
//! pricing and customer details are copied at checkout and never read back
//! from the cart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::{parse_json, parse_json_opt, Pricing};

macro_rules! text_enum {
    ($name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Unknown {}: {}", $label, s)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    DineIn,
    Takeaway,
    Delivery,
}

text_enum!(OrderType, "order type" {
    DineIn => "dine_in",
    Takeaway => "takeaway",
    Delivery => "delivery",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Online,
}

text_enum!(PaymentMethod, "payment method" {
    Cash => "cash",
    Card => "card",
    Online => "online",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

text_enum!(PaymentStatus, "payment status" {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
    Refunded => "refunded",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    OutForDelivery,
    Completed,
    Cancelled,
}

text_enum!(OrderStatus, "order status" {
    Pending => "pending",
    Confirmed => "confirmed",
    Preparing => "preparing",
    Ready => "ready",
    OutForDelivery => "out_for_delivery",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Whether an order of `order_type` may move from `self` to `next`
    pub fn can_transition_to(&self, next: OrderStatus, order_type: OrderType) -> bool {
        use OrderStatus::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Cancelled) => true,
            (Pending, Confirmed) => true,
            (Confirmed, Preparing) => true,
            (Preparing, Ready) => true,
            (Ready, OutForDelivery) => order_type == OrderType::Delivery,
            (Ready, Completed) => order_type != OrderType::Delivery,
            (OutForDelivery, Completed) => true,
            _ => false,
        }
    }
}

/// Kitchen progress of a single order line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KitchenStatus {
    Pending,
    Preparing,
    Ready,
    Served,
}

text_enum!(KitchenStatus, "kitchen status" {
    Pending => "pending",
    Preparing => "preparing",
    Ready => "ready",
    Served => "served",
});

impl KitchenStatus {
    fn rank(&self) -> u8 {
        match self {
            KitchenStatus::Pending => 0,
            KitchenStatus::Preparing => 1,
            KitchenStatus::Ready => 2,
            KitchenStatus::Served => 3,
        }
    }

    /// Kitchen progress only moves forward, one step at a time
    pub fn can_transition_to(&self, next: KitchenStatus) -> bool {
        next.rank() == self.rank() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub menu_item: String,
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
    #[serde(default)]
    pub customizations: String,
    #[serde(default)]
    pub special_instructions: Option<String>,
    pub subtotal: Decimal,
    pub kitchen_status: KitchenStatus,
}

/// Order document projected from a cart, before it is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderPayload {
    pub restaurant: String,
    pub cart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub customer: CustomerInfo,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<DeliveryAddress>,
    pub items: Vec<OrderItem>,
    pub pricing: Pricing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub id: String,
    pub order_number: String,
    pub restaurant_id: String,
    pub cart_id: String,
    pub user_id: Option<String>,
    pub customer: String,
    pub order_type: String,
    pub table_id: Option<String>,
    pub delivery_address: Option<String>,
    pub items: String,
    pub pricing: String,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
    pub payment_method: String,
    pub payment_status: String,
    pub status: String,
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub restaurant_id: String,
    pub cart_id: String,
    pub user_id: Option<String>,
    pub customer: CustomerInfo,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<DeliveryAddress>,
    pub items: Vec<OrderItem>,
    pub pricing: Pricing,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    /// Bumped on every write; staff updates compare-and-swap on it
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

fn parse_text<T: std::str::FromStr<Err = String>>(column: &str, value: &str) -> Result<T, sqlx::Error> {
    value.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

impl TryFrom<OrderRow> for Order {
    type Error = sqlx::Error;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            customer: parse_json("customer", &row.customer)?,
            order_type: parse_text("order_type", &row.order_type)?,
            delivery_address: parse_json_opt("delivery_address", row.delivery_address.as_deref())?,
            items: parse_json("items", &row.items)?,
            pricing: parse_json("pricing", &row.pricing)?,
            payment_method: parse_text("payment_method", &row.payment_method)?,
            payment_status: parse_text("payment_status", &row.payment_status)?,
            status: parse_text("status", &row.status)?,
            id: row.id,
            order_number: row.order_number,
            restaurant_id: row.restaurant_id,
            cart_id: row.cart_id,
            user_id: row.user_id,
            table_id: row.table_id,
            coupon_code: row.coupon_code,
            notes: row.notes,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub const ORDER_FIELDS: &[&str] = &[
    "id",
    "order_number",
    "restaurant_id",
    "cart_id",
    "user_id",
    "order_type",
    "payment_method",
    "payment_status",
    "status",
    "created_at",
    "updated_at",
];

/// Changes staff may apply to an order
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOrderRequest {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    /// Set a single line's kitchen progress
    #[serde(skip)]
    pub kitchen: Option<(usize, KitchenStatus)>,
    #[serde(default)]
    pub expected_revision: Option<i64>,
}
