use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use confab_shared::{CoreError, CoreResult};
use confab_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for ServerError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound(what) => ServerError::NotFound(what),
            CoreError::Forbidden(why) => ServerError::Forbidden(why),
            CoreError::InvalidState(why) | CoreError::BadRequest(why) => {
                ServerError::BadRequest(why)
            }
            CoreError::TransientDelivery(why) | CoreError::Storage(why) => {
                ServerError::Internal(why)
            }
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        CoreError::from(e).into()
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Turns a store `NotFound` into a [`CoreError::NotFound`] naming the
/// missing record.
pub trait OrNotFound<T> {
    fn or_not_found(self, what: impl FnOnce() -> String) -> CoreResult<T>;
}

impl<T> OrNotFound<T> for Result<T, StoreError> {
    fn or_not_found(self, what: impl FnOnce() -> String) -> CoreResult<T> {
        self.map_err(|e| match e {
            StoreError::NotFound => CoreError::NotFound(what()),
            other => other.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CoreError::not_found("x"), StatusCode::NOT_FOUND),
            (CoreError::forbidden("x"), StatusCode::FORBIDDEN),
            (CoreError::invalid_state("x"), StatusCode::BAD_REQUEST),
            (CoreError::bad_request("x"), StatusCode::BAD_REQUEST),
            (CoreError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (core, status) in cases {
            let response = ServerError::from(core).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_or_not_found_names_record() {
        let result: Result<(), StoreError> = Err(StoreError::NotFound);
        assert_eq!(
            result.or_not_found(|| "conversation 42".into()),
            Err(CoreError::NotFound("conversation 42".into()))
        );
    }
}
