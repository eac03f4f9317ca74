// SPDX-License-Identifier: MIT OR Apache-2.0
//! Maps [`AadError`] and unexpected internal failures onto HTTP responses.

use aad_errors::AadError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// An error crossing the HTTP boundary: either a typed [`AadError`] (wire
/// form `{error, detail?, line?}`) or an unexpected internal failure,
/// rendered as `{error:"internal", detail:{type, msg}}` with a 500 status.
#[derive(Debug)]
pub enum ApiError {
    /// A typed, user-facing error with its own HTTP status mapping.
    Typed(AadError),
    /// An unexpected internal failure (store, I/O, codegen).
    Internal(anyhow::Error),
}

impl From<AadError> for ApiError {
    fn from(err: AadError) -> Self {
        Self::Typed(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<aad_controller::ControllerError> for ApiError {
    fn from(err: aad_controller::ControllerError) -> Self {
        match err {
            aad_controller::ControllerError::Typed(e) => Self::Typed(e),
            aad_controller::ControllerError::Internal(e) => Self::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Typed(err) => {
                let status =
                    StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
                (status, Json(err.to_json())).into_response()
            }
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                let body = json!({
                    "error": "internal",
                    "detail": { "type": "internal", "msg": err.to_string() },
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
