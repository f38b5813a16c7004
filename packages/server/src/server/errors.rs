use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::common::GatewayError;

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::SessionNotReady(_)
            | GatewayError::InvalidAddress(_)
            | GatewayError::InvalidCode
            | GatewayError::Expired => StatusCode::BAD_REQUEST,
            GatewayError::SessionNotFound => StatusCode::NOT_FOUND,
            GatewayError::PairingTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ResourceBusy(_) | GatewayError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Request-level failures outside the core taxonomy
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Gateway(GatewayError),
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError::Gateway(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Access token required" })),
            )
                .into_response(),
            ApiError::Gateway(e) => e.into_response(),
        }
    }
}
