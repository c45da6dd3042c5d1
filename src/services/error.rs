use crate::db::query::QueryError;

/// Errors raised by the service layer
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Item index {index} is out of bounds (cart has {len} items)")]
    InvalidIndex { index: usize, len: usize },

    #[error("Cart line {0} not found")]
    UnknownLine(String),

    #[error("Cannot create an order from an empty cart")]
    EmptyCart,

    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ServiceError::Forbidden(message.into())
    }
}

impl From<QueryError> for ServiceError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::UnknownField(field) => {
                ServiceError::validation(&field, "Field cannot be used to filter or sort")
            }
            QueryError::Database(e) => ServiceError::Database(e),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
