//! Server dependencies (using traits for testability)
//!
//! This module provides the central dependency container plus the adapters
//! that bind the infrastructure traits to the bridge client and Postgres.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use wa_bridge::{BridgeError, BridgeEvent, BridgeService};

use crate::domains::auth::JwtService;
use crate::domains::otp::models::{NewOtpRecord, OtpRecord};
use crate::domains::otp::OtpService;
use crate::domains::sessions::models::{MessagingSession, SessionUpdate};
use crate::domains::sessions::{ConnectionState, HealthMonitor, SessionManager, TransportEvent};
use crate::kernel::{BaseMessagingTransport, BaseOtpStore, BaseSessionStore};

/// Consecutive failed event polls before a session is reported disconnected
const MAX_POLL_FAILURES: u32 = 5;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);
const EVENT_BUFFER: usize = 32;

// =============================================================================
// BridgeService Adapter (implements BaseMessagingTransport trait)
// =============================================================================

/// Wrapper around the bridge client. Each paired session gets a poll task
/// that forwards bridge events into the session's event channel.
pub struct BridgeTransport {
    bridge: Arc<BridgeService>,
    pollers: Mutex<HashMap<Uuid, AbortHandle>>,
}

impl BridgeTransport {
    pub fn new(bridge: Arc<BridgeService>) -> Self {
        Self {
            bridge,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    fn stop_poller(&self, session_id: Uuid) {
        let mut pollers = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(poller) = pollers.remove(&session_id) {
            poller.abort();
        }
    }
}

#[async_trait]
impl BaseMessagingTransport for BridgeTransport {
    async fn initiate_pairing(
        &self,
        session_id: Uuid,
        data_dir: &Path,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        self.bridge
            .start_session(&session_id.to_string(), &data_dir.to_string_lossy())
            .await
            .map_err(|e| anyhow!("{}", e))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let poller = tokio::spawn(forward_events(self.bridge.clone(), session_id, tx));

        let mut pollers = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pollers.insert(session_id, poller.abort_handle()) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn query_state(&self, session_id: Uuid) -> Result<Option<ConnectionState>> {
        match self.bridge.get_state(&session_id.to_string()).await {
            Ok(state) => Ok(state.map(map_state)),
            // The bridge has no client for it at all
            Err(BridgeError::UnknownSession(_)) => Ok(Some(ConnectionState::Unlaunched)),
            Err(e) => Err(anyhow!("{}", e)),
        }
    }

    async fn send(&self, session_id: Uuid, address: &str, text: &str) -> Result<bool> {
        self.bridge
            .send_message(&session_id.to_string(), address, text)
            .await
            .map_err(|e| anyhow!("{}", e))
    }

    async fn shutdown(&self, session_id: Uuid, timeout: Duration) -> Result<()> {
        self.stop_poller(session_id);
        tokio::time::timeout(timeout, self.bridge.destroy_session(&session_id.to_string()))
            .await
            .map_err(|_| anyhow!("bridge did not destroy session within {:?}", timeout))?
            .map_err(|e| anyhow!("{}", e))
    }
}

/// Long-poll the bridge and forward events until a terminal event, the
/// receiver goes away, or the bridge stays unreachable.
async fn forward_events(
    bridge: Arc<BridgeService>,
    session_id: Uuid,
    tx: mpsc::Sender<TransportEvent>,
) {
    let id = session_id.to_string();
    let mut failures = 0;

    loop {
        match bridge.poll_events(&id).await {
            Ok(events) => {
                failures = 0;
                for event in events {
                    let terminal = event.is_terminal();
                    if tx.send(map_event(event)).await.is_err() || terminal {
                        return;
                    }
                }
            }
            Err(BridgeError::UnknownSession(_)) => {
                let _ = tx
                    .send(TransportEvent::Disconnected("session unknown to bridge".to_string()))
                    .await;
                return;
            }
            Err(e) => {
                failures += 1;
                warn!(session_id = %session_id, failures, error = %e, "Bridge event poll failed");
                if failures >= MAX_POLL_FAILURES {
                    let _ = tx
                        .send(TransportEvent::Disconnected(format!("bridge unreachable: {}", e)))
                        .await;
                    return;
                }
                tokio::time::sleep(POLL_RETRY_DELAY).await;
            }
        }
    }
}

fn map_event(event: BridgeEvent) -> TransportEvent {
    match event {
        BridgeEvent::Qr { payload } => TransportEvent::PairingCode(payload),
        BridgeEvent::Authenticated => TransportEvent::Authenticated,
        BridgeEvent::Ready => TransportEvent::Ready,
        BridgeEvent::AuthFailure { reason } => TransportEvent::AuthFailure(reason),
        BridgeEvent::Disconnected { reason } => TransportEvent::Disconnected(reason),
    }
}

fn map_state(state: wa_bridge::ConnectionState) -> ConnectionState {
    use wa_bridge::ConnectionState as Bridge;
    match state {
        Bridge::Connected => ConnectionState::Connected,
        Bridge::Opening => ConnectionState::Opening,
        Bridge::Pairing => ConnectionState::Pairing,
        Bridge::Unpaired | Bridge::UnpairedIdle => ConnectionState::Unpaired,
        Bridge::Unlaunched => ConnectionState::Unlaunched,
        Bridge::Conflict => ConnectionState::Conflict,
        Bridge::Timeout | Bridge::Unknown => ConnectionState::Unknown,
    }
}

// =============================================================================
// Postgres store adapters
// =============================================================================

pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseSessionStore for PostgresSessionStore {
    async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<MessagingSession>> {
        MessagingSession::find_by_tenant(tenant_id, &self.pool).await
    }

    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<MessagingSession>> {
        MessagingSession::find_by_id(session_id, &self.pool).await
    }

    async fn create(&self, session_id: Uuid, tenant_id: Uuid) -> Result<MessagingSession> {
        MessagingSession::create(session_id, tenant_id, &self.pool).await
    }

    async fn update(&self, session_id: Uuid, update: SessionUpdate) -> Result<()> {
        MessagingSession::update(session_id, &update, &self.pool).await
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        MessagingSession::delete(session_id, &self.pool).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PostgresOtpStore {
    pool: PgPool,
}

impl PostgresOtpStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseOtpStore for PostgresOtpStore {
    async fn create(&self, record: NewOtpRecord) -> Result<OtpRecord> {
        OtpRecord::create(&record, &self.pool).await
    }

    async fn find_latest_unused(
        &self,
        address: &str,
        code: &str,
        session_id: Uuid,
    ) -> Result<Option<OtpRecord>> {
        OtpRecord::find_latest_unused(address, code, session_id, &self.pool).await
    }

    async fn mark_used(&self, id: Uuid) -> Result<bool> {
        OtpRecord::mark_used(id, &self.pool).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let deleted = OtpRecord::delete_expired(now, &self.pool).await?;
        debug!(deleted, "Deleted expired OTP records");
        Ok(deleted)
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Everything the HTTP layer and scheduled tasks need, constructed once at
/// startup
#[derive(Clone)]
pub struct ServerDeps {
    pub session_store: Arc<dyn BaseSessionStore>,
    pub sessions: SessionManager,
    pub otp: OtpService,
    pub health: HealthMonitor,
    pub jwt_service: Arc<JwtService>,
    /// Echo generated codes in API responses (development only)
    pub expose_codes: bool,
}

impl ServerDeps {
    pub fn new(
        session_store: Arc<dyn BaseSessionStore>,
        sessions: SessionManager,
        otp: OtpService,
        jwt_service: Arc<JwtService>,
        expose_codes: bool,
    ) -> Self {
        let health = HealthMonitor::new(sessions.clone());
        Self {
            session_store,
            sessions,
            otp,
            health,
            jwt_service,
            expose_codes,
        }
    }
}
