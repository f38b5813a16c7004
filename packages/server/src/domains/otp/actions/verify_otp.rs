use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::common::{GatewayError, GatewayResult};
use crate::domains::otp::models::OtpRecord;
use crate::domains::otp::OtpService;

impl OtpService {
    /// Consume the most recent unused code for the exact
    /// (address, code, session) triple.
    pub async fn verify(
        &self,
        address: &str,
        code: &str,
        session_id: Uuid,
    ) -> GatewayResult<OtpRecord> {
        self.verify_at(address, code, session_id, Utc::now()).await
    }

    /// `verify` against an explicit clock
    pub async fn verify_at(
        &self,
        address: &str,
        code: &str,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> GatewayResult<OtpRecord> {
        let record = self
            .store
            .find_latest_unused(address, code, session_id)
            .await?
            .ok_or(GatewayError::InvalidCode)?;

        if record.is_expired_at(now) {
            return Err(GatewayError::Expired);
        }

        // A concurrent verify may have consumed it between find and update
        if !self.store.mark_used(record.id).await? {
            return Err(GatewayError::InvalidCode);
        }

        info!(session_id = %session_id, otp_id = %record.id, "OTP verified");
        Ok(OtpRecord {
            used: true,
            ..record
        })
    }
}
