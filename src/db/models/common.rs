//! Common types and utilities shared across models.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

/// Current time in the canonical stored format (`2026-01-31T12:00:00Z`).
///
/// All timestamps share this format so lexicographic comparison in SQL
/// matches chronological order.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Helper to parse a JSON text column
pub fn parse_json<T: DeserializeOwned>(column: &str, json: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(json).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Helper to parse a nullable JSON text column
pub fn parse_json_opt<T: DeserializeOwned>(
    column: &str,
    json: Option<&str>,
) -> Result<Option<T>, sqlx::Error> {
    json.map(|s| parse_json(column, s)).transpose()
}

/// Helper to parse a decimal stored as text
pub fn parse_decimal(column: &str, value: &str) -> Result<Decimal, sqlx::Error> {
    value.parse::<Decimal>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Round a money amount to cents
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp(2)
}

/// Pricing block shared by carts and orders.
///
/// Values are computed by the store on every cart write and copied verbatim
/// into the order at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// One page of a collection query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub docs: Vec<T>,
    pub total_docs: i64,
    pub total_pages: i64,
    pub page: i64,
    pub limit: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl<T> Page<T> {
    pub fn new(docs: Vec<T>, total_docs: i64, page: i64, limit: i64) -> Self {
        let total_pages = if total_docs == 0 {
            0
        } else {
            (total_docs + limit - 1) / limit
        };
        Self {
            docs,
            total_docs,
            total_pages,
            page,
            limit,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }

    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        let docs = self.docs.into_iter().map(f).collect::<Result<Vec<_>, E>>()?;
        Ok(Page {
            docs,
            total_docs: self.total_docs,
            total_pages: self.total_pages,
            page: self.page,
            limit: self.limit,
            has_next_page: self.has_next_page,
            has_prev_page: self.has_prev_page,
        })
    }
}

/// Accept either a single value or a list of values.
pub fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}
