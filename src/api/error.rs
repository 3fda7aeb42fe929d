//! API error responses
//!
//! Every failure leaves the API as `{ "error": ..., "code": ... }` with a
//! stable code; internal error text is logged, never returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::common::{BridgeError, EventCategory, LogEvent, LogLevel};

#[derive(Debug)]
pub enum ApiError {
    Bridge(BridgeError),
    Validation(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Bridge(BridgeError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Bridge(BridgeError::PreconditionFailed(_)) => StatusCode::CONFLICT,
            ApiError::Bridge(BridgeError::Transient(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Bridge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self::Bridge(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (message, code) = match &self {
            ApiError::Validation(msg) => (msg.clone(), "VALIDATION_ERROR"),
            ApiError::Bridge(err) => (err.public_message(), err.error_code()),
        };

        if status.is_server_error() {
            if let ApiError::Bridge(err) = &self {
                LogEvent::new(LogLevel::Error, EventCategory::Api, "request_failed")
                    .with_error(code, err.to_string())
                    .emit(LogLevel::Error);
            }
        }

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Precondition;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::validation("bad"), StatusCode::BAD_REQUEST),
            (BridgeError::not_found("x").into(), StatusCode::NOT_FOUND),
            (
                BridgeError::from(Precondition::NotReady).into(),
                StatusCode::CONFLICT,
            ),
            (BridgeError::transient("rpc").into(), StatusCode::SERVICE_UNAVAILABLE),
            (
                BridgeError::DataIntegrity("row".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status);
        }
    }
}
