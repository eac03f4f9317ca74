// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route handlers, grouped by the resource they serve.

pub mod actions;
pub mod config;
pub mod health;
pub mod logs;
pub mod pipeline;
pub mod queues;
pub mod readme;
pub mod scripts;

use crate::error::ApiError;
use aad_errors::{AadError, ErrorCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode a JSON body into `T`, mapping a shape mismatch to `invalid_body`.
pub fn parse_body<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| AadError::new(ErrorCode::InvalidBody, format!("invalid request body: {e}")))
        .map_err(ApiError::from)
}
