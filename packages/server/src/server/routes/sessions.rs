//! Tenant routes (bearer token required)

use axum::{extract::Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::GatewayError;
use crate::domains::sessions::{PairingOutcome, SessionStatus};
use crate::server::app::AppState;
use crate::server::errors::ApiError;
use crate::server::middleware::AuthUser;

#[derive(Serialize)]
pub struct TenantSession {
    uuid: Uuid,
    status: SessionStatus,
    qr_code: Option<String>,
    last_activity: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    uuid: Uuid,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Deserialize)]
pub struct TenantSendOtpRequest {
    #[serde(default)]
    phone_number: String,
}

#[derive(Serialize)]
pub struct TenantSendOtpResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    otp_code: Option<String>,
}

fn require_user(auth: Option<Extension<AuthUser>>) -> Result<AuthUser, ApiError> {
    auth.map(|Extension(user)| user).ok_or(ApiError::Unauthorized)
}

/// GET /api/session
pub async fn get_session_handler(
    Extension(state): Extension<AppState>,
    auth: Option<Extension<AuthUser>>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(auth)?;

    let session = state
        .deps
        .sessions
        .tenant_session(user.tenant_id)
        .await?
        .map(|view| TenantSession {
            uuid: view.session_id,
            status: view.status,
            qr_code: view.artifact,
            last_activity: view.last_activity,
        });

    Ok(Json(json!({ "session": session })))
}

/// POST /api/session/generate
pub async fn generate_session_handler(
    Extension(state): Extension<AppState>,
    auth: Option<Extension<AuthUser>>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let user = require_user(auth)?;

    let result = state.deps.sessions.generate(user.tenant_id).await?;
    let status = result.outcome.as_str();
    let (qr_code, message) = match result.outcome {
        PairingOutcome::Qr { artifact } => (Some(artifact), None),
        PairingOutcome::Error { message } => (None, Some(message)),
        PairingOutcome::Ready | PairingOutcome::Timeout => (None, None),
    };

    Ok(Json(GenerateResponse {
        uuid: result.session_id,
        status,
        qr_code,
        message,
    }))
}

/// POST /api/session/send-otp
pub async fn tenant_send_otp_handler(
    Extension(state): Extension<AppState>,
    auth: Option<Extension<AuthUser>>,
    Json(request): Json<TenantSendOtpRequest>,
) -> Result<Json<TenantSendOtpResponse>, ApiError> {
    let user = require_user(auth)?;
    if request.phone_number.trim().is_empty() {
        return Err(ApiError::BadRequest("Phone number is required".to_string()));
    }

    let Some(session) = state
        .deps
        .session_store
        .find_by_tenant(user.tenant_id)
        .await
        .map_err(GatewayError::Storage)?
    else {
        return Err(ApiError::BadRequest(
            "No messaging session found. Please generate a pairing code first.".to_string(),
        ));
    };

    let issued = state
        .deps
        .otp
        .issue_and_send(user.tenant_id, &request.phone_number, session.id)
        .await;

    match issued {
        Ok(record) => Ok(Json(TenantSendOtpResponse {
            success: true,
            message: "OTP sent successfully".to_string(),
            otp_code: state.deps.expose_codes.then_some(record.code),
        })),
        Err(e @ (GatewayError::SessionNotReady(_) | GatewayError::Transport(_))) => {
            Ok(Json(TenantSendOtpResponse {
                success: false,
                message: e.to_string(),
                otp_code: None,
            }))
        }
        Err(e) => Err(e.into()),
    }
}
