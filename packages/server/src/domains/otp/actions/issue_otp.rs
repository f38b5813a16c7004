use anyhow::anyhow;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::common::{GatewayError, GatewayResult};
use crate::domains::otp::code::{generate_code, normalize_address, render_message};
use crate::domains::otp::models::{NewOtpRecord, OtpRecord};
use crate::domains::otp::OtpService;
use crate::domains::sessions::SessionStatus;

/// Public send request. A caller-supplied code is delivered but not tracked
/// for verification; a caller-supplied message replaces the template.
#[derive(Debug, Clone, Default)]
pub struct OpenSendRequest {
    pub session_id: Uuid,
    pub address: String,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// What was delivered by an open send
#[derive(Debug, Clone)]
pub struct OpenSend {
    pub code: String,
    pub message: String,
    /// Only auto-generated codes are persisted
    pub record: Option<OtpRecord>,
}

impl OtpService {
    /// Issue a fresh code for a tenant and deliver it through the session.
    ///
    /// The record is persisted before sending. If delivery fails the record
    /// stays behind and the caller gets `Transport`.
    pub async fn issue_and_send(
        &self,
        tenant_id: Uuid,
        address: &str,
        session_id: Uuid,
    ) -> GatewayResult<OtpRecord> {
        let to = self.prepare(address, session_id).await?;

        let code = generate_code();
        let record = self.persist(tenant_id, address, &code, session_id).await?;
        let text = render_message(&self.settings.message_template, &code, self.settings.ttl);

        self.deliver(session_id, &to, &text).await?;
        info!(session_id = %session_id, otp_id = %record.id, "OTP sent");
        Ok(record)
    }

    /// Public variant keyed by session id only
    pub async fn send_open(&self, request: OpenSendRequest) -> GatewayResult<OpenSend> {
        let session = self
            .sessions
            .find_session(request.session_id)
            .await?
            .ok_or(GatewayError::SessionNotFound)?;
        let to = self.prepare(&request.address, session.id).await?;

        let supplied = non_blank(request.code);
        let code = supplied.clone().unwrap_or_else(generate_code);
        let message = non_blank(request.message).unwrap_or_else(|| {
            render_message(&self.settings.message_template, &code, self.settings.ttl)
        });

        let record = match supplied {
            Some(_) => None,
            None => Some(
                self.persist(session.tenant_id, &request.address, &code, session.id)
                    .await?,
            ),
        };

        self.deliver(session.id, &to, &message).await?;
        info!(session_id = %session.id, tracked = record.is_some(), "Open API OTP sent");

        Ok(OpenSend {
            code,
            message,
            record,
        })
    }

    /// Readiness precondition plus address normalization
    async fn prepare(&self, address: &str, session_id: Uuid) -> GatewayResult<String> {
        let status = self.sessions.status(session_id).await;
        if status != SessionStatus::Ready {
            return Err(GatewayError::SessionNotReady(status));
        }
        normalize_address(address, &self.settings.country_code)
            .ok_or_else(|| GatewayError::InvalidAddress(address.to_string()))
    }

    async fn persist(
        &self,
        tenant_id: Uuid,
        address: &str,
        code: &str,
        session_id: Uuid,
    ) -> GatewayResult<OtpRecord> {
        let ttl = chrono::Duration::from_std(self.settings.ttl)
            .map_err(|e| GatewayError::Storage(anyhow!("invalid OTP ttl: {}", e)))?;

        Ok(self
            .store
            .create(NewOtpRecord {
                tenant_id,
                address: address.to_string(),
                code: code.to_string(),
                session_id,
                expires_at: Utc::now() + ttl,
            })
            .await?)
    }

    async fn deliver(&self, session_id: Uuid, to: &str, text: &str) -> GatewayResult<()> {
        if self.sessions.send_message(session_id, to, text).await? {
            return Ok(());
        }
        warn!(session_id = %session_id, "Transport did not accept OTP message");
        Err(GatewayError::Transport(anyhow!(
            "message was not accepted by the transport"
        )))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
