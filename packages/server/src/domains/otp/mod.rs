//! OTP domain - issue codes through a ready messaging session and verify
//! them exactly once.

pub mod actions;
pub mod code;
pub mod models;

use std::sync::Arc;
use std::time::Duration;

use crate::domains::sessions::SessionManager;
use crate::kernel::BaseOtpStore;

pub use actions::{OpenSend, OpenSendRequest};
pub use code::{generate_code, normalize_address, render_message, DEFAULT_MESSAGE_TEMPLATE};
pub use models::{NewOtpRecord, OtpRecord};

#[derive(Debug, Clone)]
pub struct OtpSettings {
    pub ttl: Duration,
    /// Placeholders: `{code}`, `{minutes}`
    pub message_template: String,
    pub country_code: String,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            message_template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
            country_code: "62".to_string(),
        }
    }
}

/// Issues and verifies OTPs. Depends on the session manager only for
/// readiness and message delivery.
#[derive(Clone)]
pub struct OtpService {
    store: Arc<dyn BaseOtpStore>,
    sessions: SessionManager,
    settings: OtpSettings,
}

impl OtpService {
    pub fn new(store: Arc<dyn BaseOtpStore>, sessions: SessionManager, settings: OtpSettings) -> Self {
        Self {
            store,
            sessions,
            settings,
        }
    }

    pub fn settings(&self) -> &OtpSettings {
        &self.settings
    }
}
