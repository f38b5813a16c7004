// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Lifecycle and OTP rules live in the domains and use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseMessagingTransport)

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domains::otp::models::{NewOtpRecord, OtpRecord};
use crate::domains::sessions::models::{MessagingSession, SessionUpdate};
use crate::domains::sessions::{ConnectionState, TransportEvent};

// =============================================================================
// Messaging Transport Trait (Infrastructure - pairing + outbound messages)
// =============================================================================

#[async_trait]
pub trait BaseMessagingTransport: Send + Sync {
    /// Launch the client for a session and return its event stream.
    ///
    /// `data_dir` is where the client keeps the session's pairing data.
    /// The stream ends after a terminal event or when the client goes away.
    async fn initiate_pairing(
        &self,
        session_id: Uuid,
        data_dir: &Path,
    ) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Query the client's connection state (`None` = not reported yet)
    async fn query_state(&self, session_id: Uuid) -> Result<Option<ConnectionState>>;

    /// Send a text message to a normalized address. Returns whether the
    /// transport accepted it.
    async fn send(&self, session_id: Uuid, address: &str, text: &str) -> Result<bool>;

    /// Tear the client down, giving up after `timeout`
    async fn shutdown(&self, session_id: Uuid, timeout: Duration) -> Result<()>;
}

// =============================================================================
// Session Store Trait (Infrastructure - durable session rows)
// =============================================================================

#[async_trait]
pub trait BaseSessionStore: Send + Sync {
    async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<MessagingSession>>;

    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<MessagingSession>>;

    /// Create a row at `initializing`
    async fn create(&self, session_id: Uuid, tenant_id: Uuid) -> Result<MessagingSession>;

    async fn update(&self, session_id: Uuid, update: SessionUpdate) -> Result<()>;

    async fn delete(&self, session_id: Uuid) -> Result<()>;

    /// Cheap liveness check for the health endpoint
    async fn ping(&self) -> Result<()>;
}

// =============================================================================
// OTP Store Trait (Infrastructure - durable OTP records)
// =============================================================================

#[async_trait]
pub trait BaseOtpStore: Send + Sync {
    async fn create(&self, record: NewOtpRecord) -> Result<OtpRecord>;

    /// Most recent unused record for the exact (address, code, session) triple
    async fn find_latest_unused(
        &self,
        address: &str,
        code: &str,
        session_id: Uuid,
    ) -> Result<Option<OtpRecord>>;

    /// Flip `used` on an unused record. Returns false if it was already used.
    async fn mark_used(&self, id: Uuid) -> Result<bool>;

    /// Delete every record with `expires_at < now`, used or not
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}
