//! Fixtures for driving the core through mock dependencies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use otp_core::domains::sessions::{PairingOutcome, SessionManager, TransportEvent};
use otp_core::kernel::test_dependencies::{InMemoryOtpStore, InMemorySessionStore, MockTransport};
use otp_core::kernel::{ServerDeps, TestDependencies};
use tempfile::TempDir;
use uuid::Uuid;

/// Core wired to mocks, with a private sessions directory
pub struct TestEnv {
    pub deps: Arc<ServerDeps>,
    pub transport: Arc<MockTransport>,
    pub session_store: Arc<InMemorySessionStore>,
    pub otp_store: Arc<InMemoryOtpStore>,
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let test = TestDependencies::new(dir.path());
        let transport = test.transport.clone();
        let session_store = test.session_store.clone();
        let otp_store = test.otp_store.clone();

        Self {
            deps: Arc::new(test.into_deps()),
            transport,
            session_store,
            otp_store,
            dir,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.deps.sessions
    }

    /// Pair a tenant straight to ready and return its session id
    pub async fn ready_session(&self, tenant_id: Uuid) -> Uuid {
        self.transport.script_pairing(vec![TransportEvent::Ready]);
        let result = self
            .sessions()
            .generate(tenant_id)
            .await
            .expect("generate");
        assert_eq!(result.outcome, PairingOutcome::Ready);
        result.session_id
    }
}

/// Poll `check` until it holds, for up to two seconds
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
