use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crawlforge_types::StoreError;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the Monitoring API's read-only handlers (§4.9).
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("request timed out")]
    Timeout,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
