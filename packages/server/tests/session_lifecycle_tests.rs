//! Integration tests for the messaging session lifecycle.
//!
//! Covers:
//! - Pairing, authentication and readiness
//! - Regeneration of an existing session
//! - Disconnect and auth-failure cleanup
//! - Status reporting against the live transport

mod common;

use common::{wait_until, TestEnv};
use otp_core::domains::sessions::{
    encode_pairing_artifact, ConnectionState, PairingOutcome, SessionStatus, TransportEvent,
};
use std::time::Duration;

use uuid::Uuid;

async fn registry_status(env: &TestEnv, session_id: Uuid) -> Option<SessionStatus> {
    env.sessions()
        .registry()
        .get(session_id)
        .await
        .map(|entry| entry.status)
}

// ============================================================================
// Pairing
// ============================================================================

#[tokio::test]
async fn test_pairing_through_to_ready() {
    let env = &TestEnv::new();
    let tenant_id = Uuid::new_v4();

    env.transport
        .script_pairing(vec![TransportEvent::PairingCode("payload-A".to_string())]);
    let result = env.sessions().generate(tenant_id).await.unwrap();

    let expected = encode_pairing_artifact("payload-A").unwrap();
    assert_eq!(
        result.outcome,
        PairingOutcome::Qr {
            artifact: expected.clone()
        }
    );
    let session_id = result.session_id;

    let row = env.session_store.row(session_id).unwrap();
    assert_eq!(row.tenant_id, tenant_id);
    assert_eq!(row.status, SessionStatus::Qr);
    assert_eq!(row.pairing_artifact.as_deref(), Some(expected.as_str()));

    // Authenticated keeps the artifact visible
    assert!(env.transport.emit(session_id, TransportEvent::Authenticated).await);
    assert!(
        wait_until(|| async move {
            registry_status(env, session_id).await == Some(SessionStatus::Authenticated)
        })
        .await
    );
    let view = env.sessions().tenant_session(tenant_id).await.unwrap().unwrap();
    assert_eq!(view.session_id, session_id);
    assert_eq!(view.status, SessionStatus::Authenticated);
    assert_eq!(view.artifact.as_deref(), Some(expected.as_str()));
    assert!(!env.sessions().is_ready(session_id).await);

    // Ready clears it and enables sending
    assert!(env.transport.emit(session_id, TransportEvent::Ready).await);
    assert!(wait_until(|| env.sessions().is_ready(session_id)).await);
    let view = env.sessions().tenant_session(tenant_id).await.unwrap().unwrap();
    assert_eq!(view.status, SessionStatus::Ready);
    assert_eq!(view.artifact, None);

    assert!(
        wait_until(|| async move {
            env.session_store
                .row(session_id)
                .is_some_and(|row| row.status == SessionStatus::Ready && row.pairing_artifact.is_none())
        })
        .await
    );

    let sent = env
        .sessions()
        .send_message(session_id, "6281234567890", "hello")
        .await
        .unwrap();
    assert!(sent);
    assert_eq!(env.transport.sent_messages().len(), 1);
}

#[tokio::test]
async fn test_pairing_data_dir_is_segregated_per_session() {
    let env = &TestEnv::new();
    env.transport
        .script_pairing(vec![TransportEvent::PairingCode("payload".to_string())]);

    let result = env.sessions().generate(Uuid::new_v4()).await.unwrap();

    let pairings = env.transport.pairings();
    assert_eq!(pairings.len(), 1);
    assert_eq!(pairings[0].0, result.session_id);
    assert_eq!(
        pairings[0].1,
        env.dir.path().join(format!("session-{}", result.session_id))
    );
}

#[tokio::test]
async fn test_generate_times_out_but_lifecycle_continues() {
    let env = &TestEnv::new();

    let result = env.sessions().generate(Uuid::new_v4()).await.unwrap();
    assert_eq!(result.outcome, PairingOutcome::Timeout);
    let session_id = result.session_id;

    assert!(
        env.transport
            .emit(session_id, TransportEvent::PairingCode("late".to_string()))
            .await
    );
    assert!(
        wait_until(|| async move { registry_status(env, session_id).await == Some(SessionStatus::Qr) })
            .await
    );

    assert!(env.transport.emit(session_id, TransportEvent::Ready).await);
    assert!(wait_until(|| env.sessions().is_ready(session_id)).await);
}

#[tokio::test]
async fn test_generate_on_ready_session_is_idempotent() {
    let env = &TestEnv::new();
    let tenant_id = Uuid::new_v4();
    let session_id = env.ready_session(tenant_id).await;

    let again = env.sessions().generate(tenant_id).await.unwrap();

    assert_eq!(again.session_id, session_id);
    assert_eq!(again.outcome, PairingOutcome::Ready);
    assert_eq!(env.transport.pairings().len(), 1);
    assert!(env.transport.shutdown_calls().is_empty());
}

#[tokio::test]
async fn test_transport_launch_failure_reports_error() {
    let env = &TestEnv::new();
    env.transport.fail_initiate(true);

    let result = env.sessions().generate(Uuid::new_v4()).await.unwrap();

    assert!(matches!(result.outcome, PairingOutcome::Error { .. }));
    assert!(env.sessions().registry().is_empty().await);
    assert_eq!(
        env.sessions().status(result.session_id).await,
        SessionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_sessions_for_different_tenants_pair_concurrently() {
    let env = &TestEnv::new();
    for _ in 0..5 {
        env.transport.script_pairing(vec![TransportEvent::Ready]);
    }

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let sessions = env.sessions().clone();
            tokio::spawn(async move { sessions.generate(Uuid::new_v4()).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.outcome, PairingOutcome::Ready);
    }
    assert_eq!(env.sessions().registry().len().await, 5);
    assert_eq!(env.session_store.len(), 5);
}

// ============================================================================
// Regeneration
// ============================================================================

#[tokio::test]
async fn test_regenerate_replaces_pairing_code_and_keeps_id() {
    let env = &TestEnv::new();
    let tenant_id = Uuid::new_v4();

    env.transport
        .script_pairing(vec![TransportEvent::PairingCode("payload-A".to_string())]);
    let first = env.sessions().generate(tenant_id).await.unwrap();

    env.transport
        .script_pairing(vec![TransportEvent::PairingCode("payload-B".to_string())]);
    let second = env.sessions().generate(tenant_id).await.unwrap();

    assert_eq!(first.session_id, second.session_id);
    assert_ne!(first.outcome, second.outcome);
    assert_eq!(
        second.outcome,
        PairingOutcome::Qr {
            artifact: encode_pairing_artifact("payload-B").unwrap()
        }
    );

    // The previous transport instance was shut down before relaunching
    assert_eq!(env.transport.shutdown_calls(), vec![first.session_id]);
    assert_eq!(env.transport.pairings().len(), 2);
    assert_eq!(env.sessions().registry().len().await, 1);
    assert_eq!(env.session_store.len(), 1);
}

#[tokio::test]
async fn test_regenerate_survives_hanging_shutdown() {
    let env = &TestEnv::new();
    let tenant_id = Uuid::new_v4();
    env.transport.hang_shutdown(true);

    env.transport
        .script_pairing(vec![TransportEvent::PairingCode("payload-A".to_string())]);
    env.sessions().generate(tenant_id).await.unwrap();

    env.transport
        .script_pairing(vec![TransportEvent::PairingCode("payload-B".to_string())]);
    let second = env.sessions().generate(tenant_id).await.unwrap();

    assert!(matches!(second.outcome, PairingOutcome::Qr { .. }));
}

// ============================================================================
// Termination and cleanup
// ============================================================================

#[tokio::test]
async fn test_disconnect_removes_row_entry_and_files() {
    let env = &TestEnv::new();
    let tenant_id = Uuid::new_v4();
    let session_id = env.ready_session(tenant_id).await;

    let session_dir = &env.dir.path().join(format!("session-{}", session_id));
    std::fs::create_dir_all(session_dir.join("auth")).unwrap();
    std::fs::write(session_dir.join("auth/creds.json"), b"{}").unwrap();

    assert!(
        env.transport
            .emit(session_id, TransportEvent::Disconnected("LOGOUT".to_string()))
            .await
    );

    assert!(
        wait_until(|| async move { env.sessions().registry().get(session_id).await.is_none() }).await
    );
    assert!(wait_until(|| async move { env.session_store.row(session_id).is_none() }).await);
    assert!(wait_until(|| async move { !session_dir.exists() }).await);

    assert!(env.sessions().tenant_session(tenant_id).await.unwrap().is_none());
    assert_eq!(
        env.sessions().status(session_id).await,
        SessionStatus::Disconnected
    );
    assert!(!env
        .sessions()
        .send_message(session_id, "6281234567890", "hello")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_disconnect_releases_transport_instance() {
    let env = &TestEnv::new();
    let session_id = env.ready_session(Uuid::new_v4()).await;

    env.transport
        .emit(session_id, TransportEvent::Disconnected("LOGOUT".to_string()))
        .await;

    assert!(wait_until(|| async move { env.session_store.row(session_id).is_none() }).await);
    assert_eq!(env.transport.shutdown_calls(), vec![session_id]);
}

#[tokio::test]
async fn test_auth_failure_resolves_generate_with_error() {
    let env = &TestEnv::new();
    env.transport
        .script_pairing(vec![TransportEvent::AuthFailure("bad credentials".to_string())]);

    let result = env.sessions().generate(Uuid::new_v4()).await.unwrap();

    match result.outcome {
        PairingOutcome::Error { message } => {
            assert!(message.contains("auth_failure"));
            assert!(message.contains("bad credentials"));
        }
        other => panic!("expected error outcome, got {:?}", other),
    }
    assert!(env.sessions().registry().is_empty().await);
    assert!(env.session_store.row(result.session_id).is_none());
}

#[tokio::test]
async fn test_closed_event_stream_is_treated_as_disconnect() {
    let env = &TestEnv::new();
    let session_id = env.ready_session(Uuid::new_v4()).await;

    env.transport.close_stream(session_id);

    assert!(
        wait_until(|| async move { env.sessions().registry().get(session_id).await.is_none() }).await
    );
    assert!(wait_until(|| async move { env.session_store.row(session_id).is_none() }).await);
}

#[tokio::test]
async fn test_tenant_can_pair_again_after_disconnect() {
    let env = &TestEnv::new();
    let tenant_id = Uuid::new_v4();
    let first = env.ready_session(tenant_id).await;

    env.transport
        .emit(first, TransportEvent::Disconnected("LOGOUT".to_string()))
        .await;
    assert!(wait_until(|| async move { env.session_store.is_empty() }).await);

    let second = env.ready_session(tenant_id).await;
    assert_ne!(first, second);
    assert!(env.sessions().is_ready(second).await);
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn test_status_of_unknown_session_is_disconnected() {
    let env = &TestEnv::new();
    assert_eq!(
        env.sessions().status(Uuid::new_v4()).await,
        SessionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_ready_session_with_dead_transport_reports_disconnected() {
    let env = &TestEnv::new();
    let session_id = env.ready_session(Uuid::new_v4()).await;

    env.transport.set_state(session_id, ConnectionState::Connected);
    assert_eq!(env.sessions().status(session_id).await, SessionStatus::Ready);

    env.transport.set_state(session_id, ConnectionState::Unpaired);
    assert_eq!(
        env.sessions().status(session_id).await,
        SessionStatus::Disconnected
    );

    // The durable row is reconciled in the background
    assert!(
        wait_until(|| async move {
            env.session_store
                .row(session_id)
                .is_some_and(|row| row.status == SessionStatus::Disconnected)
        })
        .await
    );
}

#[tokio::test]
async fn test_status_reconciliation_does_not_overwrite_newer_status() {
    let env = &TestEnv::new();
    env.transport
        .script_pairing(vec![TransportEvent::PairingCode("payload".to_string())]);
    let session_id = env
        .sessions()
        .generate(Uuid::new_v4())
        .await
        .unwrap()
        .session_id;

    // Reconciliation reads the row only after the session became ready
    env.session_store.slow_finds(Duration::from_millis(100));
    assert_eq!(env.sessions().status(session_id).await, SessionStatus::Qr);

    assert!(env.transport.emit(session_id, TransportEvent::Ready).await);
    assert!(
        wait_until(|| async move {
            env.session_store
                .row(session_id)
                .is_some_and(|row| row.status == SessionStatus::Ready)
        })
        .await
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        env.session_store.row(session_id).unwrap().status,
        SessionStatus::Ready
    );
    assert_eq!(
        registry_status(env, session_id).await,
        Some(SessionStatus::Ready)
    );
}

#[tokio::test]
async fn test_failed_state_query_falls_back_to_last_known_status() {
    let env = &TestEnv::new();
    let session_id = env.ready_session(Uuid::new_v4()).await;

    env.transport.fail_state_queries(session_id);
    assert_eq!(env.sessions().status(session_id).await, SessionStatus::Ready);

    let env = &TestEnv::new();
    let session_id = env.ready_session(Uuid::new_v4()).await;

    env.transport.hang_state_queries(session_id);
    assert_eq!(env.sessions().status(session_id).await, SessionStatus::Ready);
}

#[tokio::test]
async fn test_store_failures_do_not_break_the_live_session() {
    let env = &TestEnv::new();
    let tenant_id = Uuid::new_v4();

    env.transport
        .script_pairing(vec![TransportEvent::PairingCode("payload".to_string())]);
    let result = env.sessions().generate(tenant_id).await.unwrap();
    let session_id = result.session_id;

    env.session_store.fail_updates(true);
    assert!(env.transport.emit(session_id, TransportEvent::Ready).await);
    assert!(wait_until(|| env.sessions().is_ready(session_id)).await);

    // The registry is authoritative; the stale row does not matter
    assert_eq!(
        env.session_store.row(session_id).unwrap().status,
        SessionStatus::Qr
    );
    assert!(env
        .sessions()
        .send_message(session_id, "6281234567890", "hello")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_send_on_pairing_session_does_not_reach_transport() {
    let env = &TestEnv::new();
    env.transport
        .script_pairing(vec![TransportEvent::PairingCode("payload".to_string())]);
    let result = env.sessions().generate(Uuid::new_v4()).await.unwrap();

    let sent = env
        .sessions()
        .send_message(result.session_id, "6281234567890", "hello")
        .await
        .unwrap();

    assert!(!sent);
    assert!(env.transport.sent_messages().is_empty());
}
