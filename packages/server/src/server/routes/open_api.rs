//! Public routes keyed by session id (no bearer token)

use axum::{extract::Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::GatewayError;
use crate::domains::otp::OpenSendRequest;
use crate::domains::sessions::SessionStatus;
use crate::server::app::AppState;
use crate::server::errors::ApiError;

#[derive(Deserialize)]
pub struct StatusRequest {
    uuid: Uuid,
}

#[derive(Deserialize)]
pub struct OpenSendOtpRequest {
    #[serde(default)]
    phone_number: String,
    uuid: Uuid,
    otp: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    #[serde(default)]
    phone_number: String,
    #[serde(default)]
    code: String,
    uuid: Uuid,
}

/// POST /api/status
pub async fn session_status_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let sessions = &state.deps.sessions;
    let Some(session) = sessions.find_session(request.uuid).await? else {
        return Ok(Json(json!({
            "exists": false,
            "status": "not_found",
            "message": "Session not found",
        })));
    };

    let status = sessions.status(session.id).await;

    Ok(Json(json!({
        "exists": true,
        "uuid": session.id,
        "status": status,
        "is_connected": status == SessionStatus::Ready,
        "last_activity": session.last_activity,
        "tenant_id": session.tenant_id,
    })))
}

/// POST /api/send-otp
pub async fn open_send_otp_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<OpenSendOtpRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.phone_number.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Phone number and UUID are required".to_string(),
        ));
    }

    let sent = state
        .deps
        .otp
        .send_open(OpenSendRequest {
            session_id: request.uuid,
            address: request.phone_number.clone(),
            code: request.otp,
            message: request.message,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "OTP sent successfully",
        "data": {
            "phone_number": request.phone_number,
            "uuid": request.uuid,
            "otp_code": state.deps.expose_codes.then_some(sent.code),
            "message_template": sent.message,
            "timestamp": Utc::now(),
        }
    })))
}

/// POST /api/verify-otp
pub async fn verify_otp_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.phone_number.trim().is_empty() || request.code.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Phone number, OTP code, and UUID are required".to_string(),
        ));
    }

    let verified = state
        .deps
        .otp
        .verify(&request.phone_number, request.code.trim(), request.uuid)
        .await;

    match verified {
        Ok(_) => Ok(Json(json!({
            "success": true,
            "message": "OTP verified successfully",
        }))),
        Err(e @ (GatewayError::InvalidCode | GatewayError::Expired)) => Ok(Json(json!({
            "success": false,
            "message": e.to_string(),
        }))),
        Err(e) => Err(e.into()),
    }
}
