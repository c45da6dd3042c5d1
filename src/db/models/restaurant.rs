//! Restaurant models. A restaurant is the tenancy boundary for carts,
//! orders and menu items.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub currency_code: String,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Columns that filters and sorts may reference
pub const RESTAURANT_FIELDS: &[&str] = &[
    "id",
    "name",
    "slug",
    "currency_code",
    "is_active",
    "created_by",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRestaurantRequest {
    pub name: String,
    /// Optional slug (generated from the name when absent)
    pub slug: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub currency_code: Option<String>,
    /// Filled from the authenticated user by the handler
    #[serde(skip)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRestaurantRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub currency_code: Option<String>,
    pub is_active: Option<bool>,
}
