//! Store error classification.
//!
//! Raw driver errors never cross the gateway boundary: everything is folded
//! into one of five kinds the rest of the control plane understands.

use stark_common::Error as CoreError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// Unique-constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A compare-and-swap transition observed stale state.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Classify a driver error by SQLSTATE where one is present.
    pub fn classify(context: &str, err: tokio_postgres::Error) -> StoreError {
        if let Some(db) = err.as_db_error() {
            let code = db.code().code();
            return match code {
                // unique_violation
                "23505" => StoreError::Conflict(format!("{context}: {}", db.message())),
                // other integrity violations are caller mistakes
                c if c.starts_with("23") => {
                    StoreError::Invalid(format!("{context}: {}", db.message()))
                }
                // serialization_failure / deadlock_detected read as stale state
                "40001" | "40P01" => {
                    StoreError::PreconditionFailed(format!("{context}: {}", db.message()))
                }
                _ => StoreError::BackendUnavailable(format!("{context}: {}", db.message())),
            };
        }
        StoreError::BackendUnavailable(format!("{context}: {err}"))
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StoreError::BackendUnavailable(format!("connection pool: {err}"))
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => CoreError::NotFound(m),
            StoreError::Conflict(m) => CoreError::Conflict(m),
            StoreError::PreconditionFailed(m) => CoreError::PreconditionFailed(m),
            StoreError::BackendUnavailable(m) => CoreError::BackendUnavailable(m),
            StoreError::Invalid(m) => CoreError::Validation(m),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Deserialize a JSONB column into its typed shape.
pub fn from_json<T: serde::de::DeserializeOwned>(
    context: &str,
    value: serde_json::Value,
) -> StoreResult<T> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::Invalid(format!("corrupt {context} column: {e}")))
}

/// Parse a TEXT enum column via its serde representation.
pub fn parse_enum<T: serde::de::DeserializeOwned>(context: &str, s: &str) -> StoreResult<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Invalid(format!("corrupt {context} column '{s}': {e}")))
}

/// TEXT representation of a serde enum value.
pub fn enum_str<T: serde::Serialize>(v: &T) -> String {
    match serde_json::to_value(v) {
        Ok(serde_json::Value::String(s)) => s,
        other => panic!("enum did not serialize to a string: {other:?}"),
    }
}
