use chrono::Utc;
use tracing::debug;

use crate::common::GatewayResult;
use crate::domains::otp::OtpService;

impl OtpService {
    /// Delete every expired record, used or not
    pub async fn sweep_expired(&self) -> GatewayResult<u64> {
        let deleted = self.store.delete_expired(Utc::now()).await?;
        if deleted > 0 {
            debug!(deleted, "Swept expired OTP records");
        }
        Ok(deleted)
    }
}
