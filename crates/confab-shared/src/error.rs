use thiserror::Error;

/// Failure taxonomy of the conversation and presence core.
///
/// `NotFound`, `Forbidden`, `InvalidState` and `BadRequest` are surfaced to
/// the caller and never retried. `TransientDelivery` is only ever logged by
/// the fan-out path. `Storage` aborts the operation that hit it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Delivery failed: {0}")]
    TransientDelivery(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Short machine-readable kind, used in socket error events.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::BadRequest(_) => "bad_request",
            CoreError::TransientDelivery(_) => "delivery_failed",
            CoreError::Storage(_) => "storage",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        CoreError::Forbidden(why.into())
    }

    pub fn invalid_state(why: impl Into<String>) -> Self {
        CoreError::InvalidState(why.into())
    }

    pub fn bad_request(why: impl Into<String>) -> Self {
        CoreError::BadRequest(why.into())
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
