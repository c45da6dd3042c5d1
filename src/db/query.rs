//! Declarative collection queries.
//!
//! Access predicates and list endpoints describe filters as a [`Where`]
//! tree. Filters are compiled into parameterized SQL against a whitelist of
//! columns, or evaluated directly against a single record.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, SqlitePool};

use super::models::Page;

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;
/// Highest page whose offset still fits in an `i64` at any limit
pub const MAX_PAGE: i64 = i64::MAX / MAX_LIMIT;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A filter over a collection's fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Where {
    Equals { field: String, value: String },
    In { field: String, values: Vec<String> },
    GreaterOrEqual { field: String, value: String },
    Less { field: String, value: String },
    And(Vec<Where>),
    Or(Vec<Where>),
}

impl Where {
    pub fn equals(field: &str, value: impl Into<String>) -> Self {
        Where::Equals {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn in_list(field: &str, values: Vec<String>) -> Self {
        Where::In {
            field: field.to_string(),
            values,
        }
    }

    /// Combine with another filter, flattening nested conjunctions
    pub fn and(self, other: Where) -> Self {
        match (self, other) {
            (Where::And(mut left), Where::And(right)) => {
                left.extend(right);
                Where::And(left)
            }
            (Where::And(mut left), other) => {
                left.push(other);
                Where::And(left)
            }
            (this, other) => Where::And(vec![this, other]),
        }
    }

    /// Combine an optional filter with another
    pub fn and_opt(this: Option<Where>, other: Where) -> Where {
        match this {
            Some(w) => w.and(other),
            None => other,
        }
    }

    /// Compile into a SQL boolean expression, appending bound values
    pub fn to_sql(&self, fields: &[&str], bindings: &mut Vec<String>) -> Result<String, QueryError> {
        let check = |field: &str| -> Result<(), QueryError> {
            if fields.contains(&field) {
                Ok(())
            } else {
                Err(QueryError::UnknownField(field.to_string()))
            }
        };

        match self {
            Where::Equals { field, value } => {
                check(field)?;
                bindings.push(value.clone());
                Ok(format!("{} = ?", field))
            }
            Where::GreaterOrEqual { field, value } => {
                check(field)?;
                bindings.push(value.clone());
                Ok(format!("{} >= ?", field))
            }
            Where::Less { field, value } => {
                check(field)?;
                bindings.push(value.clone());
                Ok(format!("{} < ?", field))
            }
            Where::In { field, values } => {
                check(field)?;
                if values.is_empty() {
                    return Ok("0".to_string());
                }
                bindings.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(", ");
                Ok(format!("{} IN ({})", field, placeholders))
            }
            Where::And(parts) | Where::Or(parts) => {
                if parts.is_empty() {
                    // Empty AND is vacuously true, empty OR is false
                    return Ok(if matches!(self, Where::And(_)) { "1" } else { "0" }.to_string());
                }
                let joiner = if matches!(self, Where::And(_)) { " AND " } else { " OR " };
                let compiled = parts
                    .iter()
                    .map(|p| p.to_sql(fields, bindings).map(|sql| format!("({})", sql)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(compiled.join(joiner))
            }
        }
    }

    /// Evaluate the filter against one record's field values
    pub fn matches(&self, lookup: &dyn Fn(&str) -> Option<String>) -> bool {
        match self {
            Where::Equals { field, value } => lookup(field).as_deref() == Some(value.as_str()),
            Where::In { field, values } => lookup(field).is_some_and(|v| values.contains(&v)),
            Where::GreaterOrEqual { field, value } => {
                lookup(field).is_some_and(|v| v.as_str() >= value.as_str())
            }
            Where::Less { field, value } => lookup(field).is_some_and(|v| v.as_str() < value.as_str()),
            Where::And(parts) => parts.iter().all(|p| p.matches(lookup)),
            Where::Or(parts) => parts.iter().any(|p| p.matches(lookup)),
        }
    }
}

/// Parameters of a paginated collection query.
///
/// Serialized form doubles as the cache key for list results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(rename = "where")]
    pub filter: Option<Where>,
    /// Field name, prefixed with `-` for descending order
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub page: Option<i64>,
    pub locale: Option<String>,
}

impl ListParams {
    pub fn with_filter(mut self, filter: Where) -> Self {
        self.filter = Some(Where::and_opt(self.filter.take(), filter));
        self
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn effective_page(&self) -> i64 {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    fn order_by(&self, fields: &[&str]) -> Result<String, QueryError> {
        let sort = self.sort.as_deref().unwrap_or("-created_at");
        let (field, direction) = match sort.strip_prefix('-') {
            Some(field) => (field, "DESC"),
            None => (sort, "ASC"),
        };
        if !fields.contains(&field) {
            return Err(QueryError::UnknownField(field.to_string()));
        }
        Ok(format!("ORDER BY {} {}, id ASC", field, direction))
    }
}

/// Find one page of rows from `table` matching `params`.
///
/// `fields` is the whitelist of columns that filters and sorts may name.
pub async fn find_page<T>(
    db: &SqlitePool,
    table: &str,
    fields: &[&str],
    params: &ListParams,
) -> Result<Page<T>, QueryError>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let limit = params.effective_limit();
    let page = params.effective_page();
    let offset = (page - 1).saturating_mul(limit);

    let mut bindings: Vec<String> = Vec::new();
    let where_clause = match &params.filter {
        Some(filter) => format!("WHERE {}", filter.to_sql(fields, &mut bindings)?),
        None => String::new(),
    };
    let order_by = params.order_by(fields)?;

    let count_sql = format!("SELECT COUNT(*) FROM {} {}", table, where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM {} {} {} LIMIT ? OFFSET ?",
        table, where_clause, order_by
    );
    let mut query = sqlx::query_as::<_, T>(&sql);
    for binding in &bindings {
        query = query.bind(binding);
    }
    let docs = query.bind(limit).bind(offset).fetch_all(db).await?;

    Ok(Page::new(docs, total, page, limit))
}
