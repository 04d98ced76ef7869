use thiserror::Error;

/// Persistence failure shared by the invoice store and product repository.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Optimistic concurrency check failed, or the row changed underneath us.
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    /// A unique key (invoice number, product code) is already taken.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound => "not_found",
            StoreError::Conflict(_) => "conflict",
            StoreError::Duplicate(_) => "duplicate",
            StoreError::Backend(_) => "store_error",
        }
    }
}

/// Map a SQLx error for `operation` into a [`StoreError`].
///
/// | SQLSTATE | Meaning           | StoreError  |
/// |----------|-------------------|-------------|
/// | `23505`  | unique violation  | `Duplicate` |
/// | `40001`  | serialization     | `Conflict`  |
/// | other    |                   | `Backend`   |
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(
                    db_err
                        .constraint()
                        .map(str::to_string)
                        .unwrap_or(msg),
                ),
                Some("40001") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed during {}", operation))
        }
        other => StoreError::Backend(format!("{} failed: {}", operation, other)),
    }
}
