//! Session lifecycle controller.
//!
//! `generate` (re)starts pairing for a tenant and spawns one event loop per
//! session lifecycle. The loop feeds transport events through
//! `SessionMachine` and executes the resulting effects against the registry,
//! durable storage and the cleanup subsystem. All mutations for one session
//! id happen under `SessionRegistry::lock`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cleanup::CleanupService;
use super::machines::{SessionEffect, SessionMachine};
use super::models::{MessagingSession, SessionStatus, SessionUpdate};
use super::pairing::encode_pairing_artifact;
use super::registry::{SessionRegistry, SessionSnapshot, TransportHandle};
use super::{LifecycleSettings, TransportEvent};
use crate::common::{GatewayError, GatewayResult};
use crate::kernel::{BaseMessagingTransport, BaseSessionStore};

/// What a `generate` caller gets back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairingOutcome {
    /// A pairing code is waiting to be scanned
    Qr { artifact: String },
    Ready,
    /// Nothing happened within the pairing timeout; the lifecycle keeps
    /// running and the caller should poll status
    Timeout,
    Error { message: String },
}

impl PairingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingOutcome::Qr { .. } => "qr",
            PairingOutcome::Ready => "ready",
            PairingOutcome::Timeout => "timeout",
            PairingOutcome::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub session_id: Uuid,
    pub outcome: PairingOutcome,
}

/// A tenant's session as shown to the tenant
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub status: SessionStatus,
    /// Only while the tenant still has to scan (qr / authenticated)
    pub artifact: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SessionManager {
    registry: SessionRegistry,
    store: Arc<dyn BaseSessionStore>,
    transport: Arc<dyn BaseMessagingTransport>,
    cleanup: CleanupService,
    settings: LifecycleSettings,
}

impl SessionManager {
    pub fn new(
        registry: SessionRegistry,
        store: Arc<dyn BaseSessionStore>,
        transport: Arc<dyn BaseMessagingTransport>,
        settings: LifecycleSettings,
    ) -> Self {
        let cleanup = CleanupService::new(store.clone(), registry.clone(), settings.clone());
        Self {
            registry,
            store,
            transport,
            cleanup,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn cleanup(&self) -> &CleanupService {
        &self.cleanup
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Create or regenerate the tenant's session and wait (bounded) for the
    /// first pairing code or readiness.
    pub async fn generate(&self, tenant_id: Uuid) -> GatewayResult<GenerateResult> {
        let existing = self.store.find_by_tenant(tenant_id).await?;
        let session_id = existing.as_ref().map(|s| s.id).unwrap_or_else(Uuid::new_v4);

        let guard = self.registry.lock(session_id).await;

        if self.is_ready(session_id).await {
            debug!(session_id = %session_id, "Session already ready");
            return Ok(GenerateResult {
                session_id,
                outcome: PairingOutcome::Ready,
            });
        }

        if existing.is_some() {
            info!(session_id = %session_id, tenant_id = %tenant_id, "Regenerating session");
            self.cleanup.destroy_session(session_id).await;
            self.store
                .update(
                    session_id,
                    SessionUpdate {
                        status: Some(SessionStatus::Initializing),
                        clear_artifact: true,
                        last_activity: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
        } else {
            info!(session_id = %session_id, tenant_id = %tenant_id, "Creating session");
            self.store.create(session_id, tenant_id).await?;
        }

        let data_dir = self.cleanup.session_dir(session_id);
        let events = match self.transport.initiate_pairing(session_id, &data_dir).await {
            Ok(events) => events,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to start pairing");
                return Ok(GenerateResult {
                    session_id,
                    outcome: PairingOutcome::Error {
                        message: e.to_string(),
                    },
                });
            }
        };

        let handle = TransportHandle::new(session_id, self.transport.clone());
        let generation = self.registry.register(session_id, handle).await;
        let (pending_tx, pending_rx) = oneshot::channel();
        let task = tokio::spawn(
            self.clone()
                .drive_events(session_id, generation, events, pending_tx),
        );
        self.registry
            .attach_events_task(session_id, generation, task.abort_handle())
            .await;
        drop(guard);

        let outcome = match tokio::time::timeout(self.settings.pairing_timeout, pending_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => PairingOutcome::Error {
                message: "pairing stopped before producing a code".to_string(),
            },
            Err(_) => {
                info!(session_id = %session_id, "Pairing wait timed out, lifecycle continues");
                PairingOutcome::Timeout
            }
        };

        Ok(GenerateResult {
            session_id,
            outcome,
        })
    }

    /// Event loop for one lifecycle generation. Exits on a terminal event,
    /// when superseded, or when aborted by the registry.
    async fn drive_events(
        self,
        session_id: Uuid,
        generation: u64,
        mut events: mpsc::Receiver<TransportEvent>,
        pending: oneshot::Sender<PairingOutcome>,
    ) {
        let mut machine = SessionMachine::new();
        let mut pending = Some(pending);

        loop {
            let event = events
                .recv()
                .await
                .unwrap_or_else(|| TransportEvent::Disconnected("event stream closed".to_string()));

            let _guard = self.registry.lock(session_id).await;
            if !self.registry.is_current(session_id, generation).await {
                debug!(session_id = %session_id, generation, "Superseded lifecycle, stopping");
                return;
            }

            for effect in machine.decide(&event) {
                self.apply(session_id, generation, effect, &mut pending).await;
            }

            if machine.state().is_terminal() {
                return;
            }
        }
    }

    async fn apply(
        &self,
        session_id: Uuid,
        generation: u64,
        effect: SessionEffect,
        pending: &mut Option<oneshot::Sender<PairingOutcome>>,
    ) {
        match effect {
            SessionEffect::PublishPairingCode(payload) => {
                let artifact = match encode_pairing_artifact(&payload) {
                    Ok(artifact) => artifact,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Could not encode pairing code");
                        return;
                    }
                };
                debug!(session_id = %session_id, "Pairing code received");

                let cached = artifact.clone();
                self.registry
                    .update(session_id, generation, |entry| {
                        *entry.status = SessionStatus::Qr;
                        *entry.pairing_artifact = Some(cached);
                    })
                    .await;
                self.mirror(
                    session_id,
                    SessionUpdate {
                        status: Some(SessionStatus::Qr),
                        pairing_artifact: Some(artifact.clone()),
                        ..Default::default()
                    },
                )
                .await;
                resolve(pending, PairingOutcome::Qr { artifact });
            }
            SessionEffect::MirrorStatus(status) => {
                info!(session_id = %session_id, status = %status, "Session status changed");
                self.registry
                    .update(session_id, generation, |entry| *entry.status = status)
                    .await;
                self.mirror(session_id, SessionUpdate::status(status)).await;
            }
            SessionEffect::MarkReady => {
                info!(session_id = %session_id, "Session ready");
                self.registry
                    .update(session_id, generation, |entry| {
                        *entry.status = SessionStatus::Ready;
                        *entry.ready = true;
                        *entry.pairing_artifact = None;
                    })
                    .await;
                self.mirror(
                    session_id,
                    SessionUpdate {
                        status: Some(SessionStatus::Ready),
                        clear_artifact: true,
                        last_activity: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await;
                resolve(pending, PairingOutcome::Ready);
            }
            SessionEffect::Terminate { status, reason } => {
                warn!(session_id = %session_id, status = %status, reason = %reason, "Session ended");
                self.mirror(session_id, SessionUpdate::status(status)).await;
                if let Some(entry) = self.registry.get(session_id).await {
                    let timeout = self.settings.shutdown_timeout;
                    match tokio::time::timeout(timeout, entry.handle.shutdown(timeout)).await {
                        Ok(Ok(())) => debug!(session_id = %session_id, "Transport released"),
                        Ok(Err(e)) => debug!(session_id = %session_id, error = %e, "Transport release failed"),
                        Err(_) => debug!(session_id = %session_id, "Transport release timed out"),
                    }
                }
                if let Err(e) = self.cleanup.cleanup_disconnected(session_id).await {
                    error!(session_id = %session_id, error = %e, "Session cleanup failed");
                }
                self.registry.detach_generation(session_id, generation).await;
                resolve(
                    pending,
                    PairingOutcome::Error {
                        message: format!("{}: {}", status, reason),
                    },
                );
            }
        }
    }

    /// Best-effort durable mirror; the registry stays authoritative.
    async fn mirror(&self, session_id: Uuid, update: SessionUpdate) {
        if let Err(e) = self.store.update(session_id, update).await {
            warn!(session_id = %session_id, error = %e, "Failed to mirror session status");
        }
    }

    /// Current status of a session.
    ///
    /// Without a live registry entry the session is `disconnected`. A ready
    /// session whose transport reports a dead connection is `disconnected`
    /// too. The durable row is reconciled in the background.
    pub async fn status(&self, session_id: Uuid) -> SessionStatus {
        let entry = self.registry.get(session_id).await;
        let observed = entry.as_ref().map(|e| (e.generation, e.status));
        let status = match entry {
            None => SessionStatus::Disconnected,
            Some(entry) => self.live_status(&entry).await,
        };

        let manager = self.clone();
        tokio::spawn(async move { manager.reconcile(session_id, observed, status).await });

        status
    }

    /// Write `status` to the durable row unless the entry moved on since it
    /// was observed. Runs under the session lock so it cannot interleave
    /// with the event loop's own mirror writes.
    async fn reconcile(
        &self,
        session_id: Uuid,
        observed: Option<(u64, SessionStatus)>,
        status: SessionStatus,
    ) {
        let _guard = self.registry.lock(session_id).await;
        let current = self
            .registry
            .get(session_id)
            .await
            .map(|e| (e.generation, e.status));
        if current != observed {
            debug!(session_id = %session_id, "Session changed since status read, skipping reconciliation");
            return;
        }

        match self.store.find_by_id(session_id).await {
            Ok(Some(row)) if row.status != status => {
                if let Err(e) = self.store.update(session_id, SessionUpdate::status(status)).await {
                    debug!(session_id = %session_id, error = %e, "Status reconciliation failed");
                }
            }
            Ok(_) => {}
            Err(e) => debug!(session_id = %session_id, error = %e, "Status reconciliation failed"),
        }
    }

    async fn live_status(&self, entry: &SessionSnapshot) -> SessionStatus {
        let query = tokio::time::timeout(
            self.settings.state_query_timeout,
            entry.handle.query_state(),
        )
        .await;

        match query {
            Ok(Ok(Some(state))) if entry.ready && state.is_dead() => SessionStatus::Disconnected,
            Ok(Err(e)) => {
                debug!(session_id = %entry.session_id, error = %e, "State query failed, using last known status");
                entry.status
            }
            Err(_) => {
                debug!(session_id = %entry.session_id, "State query timed out, using last known status");
                entry.status
            }
            Ok(Ok(_)) => entry.status,
        }
    }

    pub async fn is_ready(&self, session_id: Uuid) -> bool {
        self.registry
            .get(session_id)
            .await
            .is_some_and(|entry| entry.ready)
    }

    /// The tenant's session, if it has one
    pub async fn tenant_session(&self, tenant_id: Uuid) -> GatewayResult<Option<SessionView>> {
        let Some(row) = self.store.find_by_tenant(tenant_id).await? else {
            return Ok(None);
        };

        let status = self.status(row.id).await;
        let artifact = if status.shows_pairing_artifact() {
            match self.registry.get(row.id).await {
                Some(entry) => entry.pairing_artifact,
                None => row.pairing_artifact.clone(),
            }
        } else {
            None
        };

        Ok(Some(SessionView {
            session_id: row.id,
            status,
            artifact,
            last_activity: row.last_activity,
        }))
    }

    pub async fn find_session(&self, session_id: Uuid) -> GatewayResult<Option<MessagingSession>> {
        Ok(self.store.find_by_id(session_id).await?)
    }

    /// Send a text through a ready session. Returns false without touching
    /// the transport when the session is missing or not ready.
    pub async fn send_message(
        &self,
        session_id: Uuid,
        address: &str,
        text: &str,
    ) -> GatewayResult<bool> {
        let Some(entry) = self.registry.get(session_id).await.filter(|e| e.ready) else {
            return Ok(false);
        };

        let sent = entry
            .handle
            .send(address, text)
            .await
            .map_err(GatewayError::Transport)?;

        if sent {
            self.mirror(session_id, SessionUpdate::touched(Utc::now()))
                .await;
        }
        Ok(sent)
    }

    /// Route an unhealthy session through the disconnect cleanup path.
    ///
    /// Returns false when the entry was already replaced or removed.
    pub async fn reclaim_unhealthy(
        &self,
        session_id: Uuid,
        generation: u64,
        reason: &str,
    ) -> GatewayResult<bool> {
        let _guard = self.registry.lock(session_id).await;
        let Some(entry) = self.registry.remove_generation(session_id, generation).await else {
            return Ok(false);
        };

        warn!(session_id = %session_id, reason = %reason, "Reclaiming unhealthy session");

        let timeout = self.settings.shutdown_timeout;
        match tokio::time::timeout(timeout, entry.handle.shutdown(timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session_id = %session_id, error = %e, "Shutdown of unhealthy session failed"),
            Err(_) => debug!(session_id = %session_id, "Shutdown of unhealthy session timed out"),
        }

        self.mirror(session_id, SessionUpdate::status(SessionStatus::Disconnected))
            .await;
        self.cleanup.cleanup_disconnected(session_id).await?;
        Ok(true)
    }
}

fn resolve(pending: &mut Option<oneshot::Sender<PairingOutcome>>, outcome: PairingOutcome) {
    if let Some(tx) = pending.take() {
        // The caller may have timed out already
        let _ = tx.send(outcome);
    }
}
