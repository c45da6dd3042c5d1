//! Menu item models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};

use super::common::parse_decimal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: String,
    pub restaurant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub category: Option<String>,
    pub is_available: bool,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// Prices are stored as decimal text to avoid float rounding
impl<'r> FromRow<'r, SqliteRow> for MenuItem {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let price: String = row.try_get("price")?;
        Ok(Self {
            id: row.try_get("id")?,
            restaurant_id: row.try_get("restaurant_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: parse_decimal("price", &price)?,
            category: row.try_get("category")?,
            is_available: row.try_get("is_available")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub const MENU_ITEM_FIELDS: &[&str] = &[
    "id",
    "restaurant_id",
    "name",
    "category",
    "is_available",
    "created_by",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMenuItemRequest {
    pub restaurant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub category: Option<String>,
    pub is_available: Option<bool>,
    #[serde(skip)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMenuItemRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<String>,
    pub is_available: Option<bool>,
}
