use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::{AppError, Result};

/// Serialises `body` with sonic-rs into a JSON response.
pub fn respond<T: Serialize>(status: StatusCode, body: &T) -> Result<Response> {
    let body = sonic_rs::to_string(body)
        .map_err(|e| AppError::Unexpected(format!("failed to serialise response: {}", e)))?;
    Ok((status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response())
}
