use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use super::events::ConnectionState;
use super::manager::SessionManager;
use super::models::SessionStatus;
use super::registry::SessionSnapshot;

/// Counts from one health sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub healthy: usize,
    pub reclaimed: usize,
    /// Unhealthy sessions whose cleanup itself failed
    pub failed: usize,
}

enum Verdict {
    Healthy,
    Reclaimed,
    /// Entry was replaced while we were checking it
    Skipped,
    Failed,
}

/// Periodically reclaims sessions whose transport died without reporting a
/// disconnect.
#[derive(Clone)]
pub struct HealthMonitor {
    sessions: SessionManager,
}

impl HealthMonitor {
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }

    /// Check every registry entry once. Each entry is checked in its own
    /// task, so one failing session cannot stop the others.
    pub async fn sweep(&self) -> SweepReport {
        let entries = self.sessions.registry().snapshot().await;
        let mut report = SweepReport {
            checked: entries.len(),
            ..Default::default()
        };

        let checks = entries.into_iter().map(|entry| {
            let sessions = self.sessions.clone();
            tokio::spawn(async move { check_entry(&sessions, entry).await })
        });

        for result in join_all(checks).await {
            match result {
                Ok(Verdict::Healthy) | Ok(Verdict::Skipped) => report.healthy += 1,
                Ok(Verdict::Reclaimed) => report.reclaimed += 1,
                Ok(Verdict::Failed) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "Health check task panicked");
                    report.failed += 1;
                }
            }
        }

        if report.reclaimed > 0 || report.failed > 0 {
            info!(?report, "Health sweep finished");
        }
        report
    }
}

async fn check_entry(sessions: &SessionManager, entry: SessionSnapshot) -> Verdict {
    let timeout = sessions.settings().state_query_timeout;
    let reason = match tokio::time::timeout(timeout, entry.handle.query_state()).await {
        Ok(Ok(state)) => match unhealthy_state(&entry, state) {
            Some(reason) => reason,
            None => return Verdict::Healthy,
        },
        Ok(Err(e)) => format!("state query failed: {}", e),
        Err(_) => "state query timed out".to_string(),
    };

    match sessions
        .reclaim_unhealthy(entry.session_id, entry.generation, &reason)
        .await
    {
        Ok(true) => Verdict::Reclaimed,
        Ok(false) => Verdict::Skipped,
        Err(e) => {
            warn!(session_id = %entry.session_id, error = %e, "Failed to reclaim unhealthy session");
            Verdict::Failed
        }
    }
}

/// `Unlaunched` is always dead. `Unpaired` is expected while a session is
/// still being paired, and only dead once the session got past pairing.
fn unhealthy_state(entry: &SessionSnapshot, state: Option<ConnectionState>) -> Option<String> {
    let paired = entry.ready || entry.status == SessionStatus::Authenticated;
    match state {
        Some(ConnectionState::Unlaunched) => Some("transport not launched".to_string()),
        Some(ConnectionState::Unpaired) if paired => Some("transport lost pairing".to_string()),
        _ => None,
    }
}
