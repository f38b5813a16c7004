pub mod cleanup;
pub mod events;
pub mod health;
pub mod machines;
pub mod manager;
pub mod models;
pub mod pairing;
pub mod registry;

use std::path::PathBuf;
use std::time::Duration;

use crate::kernel::RetryPolicy;

pub use cleanup::CleanupService;
pub use events::{ConnectionState, TransportEvent};
pub use health::{HealthMonitor, SweepReport};
pub use machines::{transition, SessionEffect, SessionMachine};
pub use manager::{GenerateResult, PairingOutcome, SessionManager, SessionView};
pub use models::{MessagingSession, SessionStatus, SessionUpdate};
pub use pairing::encode_pairing_artifact;
pub use registry::{SessionRegistry, SessionSnapshot, TransportHandle};

/// Timeouts and retry schedules for the session lifecycle
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// How long `generate` waits for a pairing code or readiness
    pub pairing_timeout: Duration,
    /// Bound on a single connection-state query
    pub state_query_timeout: Duration,
    /// Bound on a graceful transport shutdown
    pub shutdown_timeout: Duration,
    /// Root under which each session gets its own data directory
    pub sessions_dir: PathBuf,
    /// Pause before reclaiming files after an unexpected disconnect
    pub disconnect_settle: Duration,
    /// Pause before reclaiming files after a manual destroy
    pub destroy_settle: Duration,
    pub immediate_retry: RetryPolicy,
    pub deferred_retry: RetryPolicy,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            pairing_timeout: Duration::from_secs(30),
            state_query_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            sessions_dir: PathBuf::from("./sessions"),
            disconnect_settle: Duration::from_secs(1),
            destroy_settle: Duration::from_secs(3),
            immediate_retry: RetryPolicy::immediate(4, Duration::from_secs(1), 2),
            deferred_retry: RetryPolicy::deferred(3, Duration::from_secs(60), 2),
        }
    }
}
