// TestDependencies - mock implementations for testing
//
// Provides a scriptable transport and in-memory stores that can be injected
// into ServerDeps, so the lifecycle and OTP flows run without a bridge or
// database.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{BaseMessagingTransport, BaseOtpStore, BaseSessionStore, RetryPolicy, ServerDeps};
use crate::domains::auth::JwtService;
use crate::domains::otp::models::{NewOtpRecord, OtpRecord};
use crate::domains::otp::{OtpService, OtpSettings};
use crate::domains::sessions::models::{MessagingSession, SessionStatus, SessionUpdate};
use crate::domains::sessions::{
    ConnectionState, LifecycleSettings, SessionManager, SessionRegistry, TransportEvent,
};

pub const TEST_JWT_SECRET: &str = "test_secret";
pub const TEST_JWT_ISSUER: &str = "test_issuer";

/// Millisecond-scale lifecycle timings rooted at `sessions_dir`
pub fn fast_settings(sessions_dir: &Path) -> LifecycleSettings {
    LifecycleSettings {
        pairing_timeout: Duration::from_millis(300),
        state_query_timeout: Duration::from_millis(100),
        shutdown_timeout: Duration::from_millis(100),
        sessions_dir: sessions_dir.to_path_buf(),
        disconnect_settle: Duration::ZERO,
        destroy_settle: Duration::from_millis(5),
        immediate_retry: RetryPolicy::immediate(4, Duration::from_millis(5), 2),
        deferred_retry: RetryPolicy::deferred(3, Duration::from_millis(10), 2),
    }
}

// =============================================================================
// Mock Messaging Transport
// =============================================================================

/// A message handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub session_id: Uuid,
    pub address: String,
    pub text: String,
}

#[derive(Default)]
pub struct MockTransport {
    channels: Mutex<HashMap<Uuid, mpsc::Sender<TransportEvent>>>,
    scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
    states: Mutex<HashMap<Uuid, ConnectionState>>,
    failing_queries: Mutex<HashSet<Uuid>>,
    hanging_queries: Mutex<HashSet<Uuid>>,
    pairings: Mutex<Vec<(Uuid, PathBuf)>>,
    sent: Mutex<Vec<SentMessage>>,
    shutdowns: Mutex<Vec<Uuid>>,
    fail_initiate: AtomicBool,
    fail_sends: AtomicBool,
    reject_sends: AtomicBool,
    hang_shutdown: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events delivered right after the next `initiate_pairing`. Each call
    /// scripts one pairing, consumed in order.
    pub fn script_pairing(&self, events: Vec<TransportEvent>) {
        self.scripts.lock().unwrap().push_back(events);
    }

    /// Push an event into a live session's stream. Returns false when the
    /// session has no open stream.
    pub async fn emit(&self, session_id: Uuid, event: TransportEvent) -> bool {
        let tx = self.channels.lock().unwrap().get(&session_id).cloned();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Drop the session's event stream without a terminal event
    pub fn close_stream(&self, session_id: Uuid) {
        self.channels.lock().unwrap().remove(&session_id);
    }

    pub fn set_state(&self, session_id: Uuid, state: ConnectionState) {
        self.states.lock().unwrap().insert(session_id, state);
    }

    pub fn fail_state_queries(&self, session_id: Uuid) {
        self.failing_queries.lock().unwrap().insert(session_id);
    }

    pub fn hang_state_queries(&self, session_id: Uuid) {
        self.hanging_queries.lock().unwrap().insert(session_id);
    }

    pub fn fail_initiate(&self, fail: bool) {
        self.fail_initiate.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Sends return `Ok(false)`
    pub fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    pub fn hang_shutdown(&self, hang: bool) {
        self.hang_shutdown.store(hang, Ordering::SeqCst);
    }

    pub fn pairings(&self) -> Vec<(Uuid, PathBuf)> {
        self.pairings.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn shutdown_calls(&self) -> Vec<Uuid> {
        self.shutdowns.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseMessagingTransport for MockTransport {
    async fn initiate_pairing(
        &self,
        session_id: Uuid,
        data_dir: &Path,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        if self.fail_initiate.load(Ordering::SeqCst) {
            return Err(anyhow!("mock transport failed to launch"));
        }
        self.pairings
            .lock()
            .unwrap()
            .push((session_id, data_dir.to_path_buf()));

        let (tx, rx) = mpsc::channel(32);
        if let Some(script) = self.scripts.lock().unwrap().pop_front() {
            for event in script {
                tx.try_send(event)
                    .map_err(|e| anyhow!("pairing script overflow: {}", e))?;
            }
        }
        self.channels.lock().unwrap().insert(session_id, tx);
        Ok(rx)
    }

    async fn query_state(&self, session_id: Uuid) -> Result<Option<ConnectionState>> {
        if self.failing_queries.lock().unwrap().contains(&session_id) {
            return Err(anyhow!("mock state query failed"));
        }
        if self.hanging_queries.lock().unwrap().contains(&session_id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(self.states.lock().unwrap().get(&session_id).copied())
    }

    async fn send(&self, session_id: Uuid, address: &str, text: &str) -> Result<bool> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("mock send failed"));
        }
        if self.reject_sends.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.sent.lock().unwrap().push(SentMessage {
            session_id,
            address: address.to_string(),
            text: text.to_string(),
        });
        Ok(true)
    }

    async fn shutdown(&self, session_id: Uuid, _timeout: Duration) -> Result<()> {
        self.shutdowns.lock().unwrap().push(session_id);
        self.channels.lock().unwrap().remove(&session_id);
        if self.hang_shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }
}

// =============================================================================
// In-memory Session Store
// =============================================================================

#[derive(Default)]
pub struct InMemorySessionStore {
    rows: Mutex<HashMap<Uuid, MessagingSession>>,
    fail_updates: AtomicBool,
    fail_deletes: AtomicBool,
    find_delay_ms: AtomicU64,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, session_id: Uuid) -> Option<MessagingSession> {
        self.rows.lock().unwrap().get(&session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delay every `find_by_id` before it reads the row
    pub fn slow_finds(&self, delay: Duration) {
        self.find_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl BaseSessionStore for InMemorySessionStore {
    async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<MessagingSession>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.values().find(|s| s.tenant_id == tenant_id).cloned())
    }

    async fn find_by_id(&self, session_id: Uuid) -> Result<Option<MessagingSession>> {
        let delay = self.find_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.row(session_id))
    }

    async fn create(&self, session_id: Uuid, tenant_id: Uuid) -> Result<MessagingSession> {
        let mut rows = self.rows.lock().unwrap();
        if rows.values().any(|s| s.tenant_id == tenant_id) || rows.contains_key(&session_id) {
            return Err(anyhow!("duplicate session for tenant {}", tenant_id));
        }
        let now = Utc::now();
        let session = MessagingSession {
            id: session_id,
            tenant_id,
            status: SessionStatus::Initializing,
            pairing_artifact: None,
            last_activity: Some(now),
            created_at: now,
            updated_at: now,
        };
        rows.insert(session_id, session.clone());
        Ok(session)
    }

    async fn update(&self, session_id: Uuid, update: SessionUpdate) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(anyhow!("mock session update failed"));
        }
        if let Some(row) = self.rows.lock().unwrap().get_mut(&session_id) {
            update.apply_to(row);
        }
        Ok(())
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(anyhow!("mock session delete failed"));
        }
        self.rows.lock().unwrap().remove(&session_id);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// In-memory OTP Store
// =============================================================================

#[derive(Default)]
pub struct InMemoryOtpStore {
    records: Mutex<Vec<OtpRecord>>,
    fail_creates: AtomicBool,
}

impl InMemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OtpRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Seed a record directly
    pub fn insert(&self, record: OtpRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BaseOtpStore for InMemoryOtpStore {
    async fn create(&self, record: NewOtpRecord) -> Result<OtpRecord> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(anyhow!("mock otp create failed"));
        }
        let record = OtpRecord {
            id: Uuid::new_v4(),
            tenant_id: record.tenant_id,
            address: record.address,
            code: record.code,
            session_id: record.session_id,
            used: false,
            expires_at: record.expires_at,
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn find_latest_unused(
        &self,
        address: &str,
        code: &str,
        session_id: Uuid,
    ) -> Result<Option<OtpRecord>> {
        let records = self.records.lock().unwrap();
        // max_by_key keeps the last maximum, so later inserts win ties
        Ok(records
            .iter()
            .filter(|r| !r.used && r.address == address && r.code == code && r.session_id == session_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn mark_used(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == id && !r.used) {
            Some(record) => {
                record.used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.expires_at >= now);
        Ok((before - records.len()) as u64)
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Builder wiring the mocks into a `ServerDeps`
pub struct TestDependencies {
    pub transport: Arc<MockTransport>,
    pub session_store: Arc<InMemorySessionStore>,
    pub otp_store: Arc<InMemoryOtpStore>,
    pub registry: SessionRegistry,
    pub settings: LifecycleSettings,
    pub otp_settings: OtpSettings,
    pub expose_codes: bool,
}

impl TestDependencies {
    pub fn new(sessions_dir: &Path) -> Self {
        Self {
            transport: Arc::new(MockTransport::new()),
            session_store: Arc::new(InMemorySessionStore::new()),
            otp_store: Arc::new(InMemoryOtpStore::new()),
            registry: SessionRegistry::new(),
            settings: fast_settings(sessions_dir),
            otp_settings: OtpSettings::default(),
            expose_codes: true,
        }
    }

    pub fn settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn otp_settings(mut self, settings: OtpSettings) -> Self {
        self.otp_settings = settings;
        self
    }

    pub fn session_manager(&self) -> SessionManager {
        SessionManager::new(
            self.registry.clone(),
            self.session_store.clone(),
            self.transport.clone(),
            self.settings.clone(),
        )
    }

    pub fn into_deps(self) -> ServerDeps {
        let sessions = self.session_manager();
        let otp = OtpService::new(self.otp_store.clone(), sessions.clone(), self.otp_settings);
        ServerDeps::new(
            self.session_store,
            sessions,
            otp,
            Arc::new(JwtService::new(TEST_JWT_SECRET, TEST_JWT_ISSUER.to_string())),
            self.expose_codes,
        )
    }
}
