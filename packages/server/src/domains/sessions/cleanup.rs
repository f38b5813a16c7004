//! Resource reclamation for sessions that ended or are being regenerated.
//!
//! The transport process may still hold the session's data directory open
//! right after it was destroyed, so directory removal goes through a
//! `RetryPolicy` that only retries "resource busy" failures. Exhausted retries
//! are logged and dropped.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::SessionRegistry;
use super::LifecycleSettings;
use crate::common::{GatewayError, GatewayResult};
use crate::kernel::{BaseSessionStore, RetryError, RetryPolicy};

// EBUSY and ETXTBSY
const RAW_BUSY_CODES: [i32; 2] = [16, 26];

#[derive(Clone)]
pub struct CleanupService {
    store: Arc<dyn BaseSessionStore>,
    registry: SessionRegistry,
    settings: LifecycleSettings,
}

impl CleanupService {
    pub fn new(
        store: Arc<dyn BaseSessionStore>,
        registry: SessionRegistry,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
        }
    }

    /// On-disk pairing data for one session. Never shared between sessions.
    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.settings
            .sessions_dir
            .join(format!("session-{}", session_id))
    }

    /// Terminal disconnect: delete the durable row, then reclaim the session
    /// directory in the background.
    ///
    /// The returned handle resolves once reclamation finished or gave up;
    /// callers are free to drop it.
    pub async fn cleanup_disconnected(&self, session_id: Uuid) -> GatewayResult<JoinHandle<()>> {
        self.store.delete(session_id).await?;
        info!(session_id = %session_id, "Deleted session row");

        let this = self.clone();
        Ok(tokio::spawn(async move {
            tokio::time::sleep(this.settings.disconnect_settle).await;
            this.reclaim_after_disconnect(session_id, remove_session_dir)
                .await;
        }))
    }

    /// Immediate retries first, then one deferred round when the directory
    /// is still busy. Returns whether the directory is gone.
    async fn reclaim_after_disconnect<R, Fut>(&self, session_id: Uuid, remove: R) -> bool
    where
        R: Fn(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let immediate = self
            .reclaim_with(session_id, &self.settings.immediate_retry, &remove)
            .await;
        match immediate {
            Ok(()) => return true,
            Err(GatewayError::ResourceBusy(_)) => {}
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Session directory cleanup failed");
                return false;
            }
        }

        warn!(
            session_id = %session_id,
            "Session directory still busy, scheduling deferred cleanup"
        );
        match self
            .reclaim_with(session_id, &self.settings.deferred_retry, &remove)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Giving up on session directory");
                false
            }
        }
    }

    /// Regeneration: shut the live transport down (bounded), always drop the
    /// registry entry, then reclaim the directory before the next pairing
    /// reuses it.
    pub async fn destroy_session(&self, session_id: Uuid) {
        if let Some(entry) = self.registry.remove(session_id).await {
            let timeout = self.settings.shutdown_timeout;
            match tokio::time::timeout(timeout, entry.handle.shutdown(timeout)).await {
                Ok(Ok(())) => debug!(session_id = %session_id, "Transport shut down"),
                Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "Transport shutdown failed"),
                Err(_) => warn!(session_id = %session_id, "Transport shutdown timed out"),
            }
            tokio::time::sleep(self.settings.destroy_settle).await;
        }

        if let Err(e) = self
            .reclaim_session_files(session_id, &self.settings.immediate_retry)
            .await
        {
            error!(session_id = %session_id, error = %e, "Could not reclaim session directory");
        }
    }

    /// Remove the session directory under `policy`. A missing directory is
    /// already reclaimed.
    pub async fn reclaim_session_files(
        &self,
        session_id: Uuid,
        policy: &RetryPolicy,
    ) -> GatewayResult<()> {
        self.reclaim_with(session_id, policy, remove_session_dir)
            .await
    }

    async fn reclaim_with<R, Fut>(
        &self,
        session_id: Uuid,
        policy: &RetryPolicy,
        remove: R,
    ) -> GatewayResult<()>
    where
        R: Fn(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let dir = self.session_dir(session_id);

        let result = policy
            .run(
                |attempt| {
                    let dir = dir.clone();
                    let removal = remove(dir.clone());
                    async move {
                        match removal.await {
                            Ok(()) => Ok(()),
                            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                            Err(e) if is_busy(&e) => {
                                debug!(attempt, path = %dir.display(), "Session directory busy");
                                Err(GatewayError::ResourceBusy(e.to_string()))
                            }
                            Err(e) => Err(GatewayError::Storage(anyhow!(
                                "failed to remove {}: {}",
                                dir.display(),
                                e
                            ))),
                        }
                    }
                },
                |e| matches!(e, GatewayError::ResourceBusy(_)),
            )
            .await;

        match result {
            Ok(()) => {
                debug!(session_id = %session_id, "Reclaimed session directory");
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(session_id = %session_id, attempts, error = %last, "Session directory cleanup exhausted");
                Err(last)
            }
            Err(RetryError::Permanent(e)) => Err(e),
        }
    }
}

async fn remove_session_dir(dir: PathBuf) -> io::Result<()> {
    tokio::fs::remove_dir_all(dir).await
}

/// Failures that usually clear once the previous owner lets go
pub fn is_busy(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ResourceBusy
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::DirectoryNotEmpty
    ) || err
        .raw_os_error()
        .is_some_and(|code| RAW_BUSY_CODES.contains(&code))
}
