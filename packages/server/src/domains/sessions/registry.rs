//! Process-wide registry of live messaging sessions.
//!
//! Maps a session identifier to its live transport handle plus the local
//! readiness flag and cached pairing artifact. Every entry carries a
//! generation number; an event loop or health check holding an older
//! generation must not touch a newer lifecycle for the same identifier.
//!
//! Mutations for one identifier are serialized through `lock(id)`. Callers
//! hold that guard across suspension points, never references into the map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::events::ConnectionState;
use super::models::SessionStatus;
use crate::kernel::BaseMessagingTransport;

/// Per-session view of the transport
#[derive(Clone)]
pub struct TransportHandle {
    session_id: Uuid,
    transport: Arc<dyn BaseMessagingTransport>,
}

impl TransportHandle {
    pub fn new(session_id: Uuid, transport: Arc<dyn BaseMessagingTransport>) -> Self {
        Self {
            session_id,
            transport,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn query_state(&self) -> Result<Option<ConnectionState>> {
        self.transport.query_state(self.session_id).await
    }

    pub async fn send(&self, address: &str, text: &str) -> Result<bool> {
        self.transport.send(self.session_id, address, text).await
    }

    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.transport.shutdown(self.session_id, timeout).await
    }
}

struct SessionEntry {
    handle: TransportHandle,
    generation: u64,
    status: SessionStatus,
    ready: bool,
    pairing_artifact: Option<String>,
    events_task: Option<AbortHandle>,
}

/// Copy of a registry entry, safe to hold across awaits
#[derive(Clone)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub handle: TransportHandle,
    pub generation: u64,
    pub status: SessionStatus,
    pub ready: bool,
    pub pairing_artifact: Option<String>,
}

/// Mutable fields an event loop may change on its own entry
pub struct EntryFields<'a> {
    pub status: &'a mut SessionStatus,
    pub ready: &'a mut bool,
    pub pairing_artifact: &'a mut Option<String>,
}

type LockMap = Arc<std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// Held critical section for one identifier. The per-id mutex is dropped
/// from the map once nobody holds or waits on it.
pub struct SessionLock {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: Uuid,
    locks: LockMap,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Waiters clone the Arc under this map lock, so a count of one
        // means no one else can reach this mutex
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    locks: LockMap,
    next_generation: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the critical section for one session identifier.
    pub async fn lock(&self, session_id: Uuid) -> SessionLock {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(session_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        SessionLock {
            guard: Some(lock.lock_owned().await),
            session_id,
            locks: self.locks.clone(),
        }
    }

    /// Register a fresh lifecycle at `initializing`, replacing any previous
    /// entry. Returns the new generation.
    pub async fn register(&self, session_id: Uuid, handle: TransportHandle) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.entries.write().await.insert(
            session_id,
            SessionEntry {
                handle,
                generation,
                status: SessionStatus::Initializing,
                ready: false,
                pairing_artifact: None,
                events_task: None,
            },
        );
        if let Some(task) = previous.and_then(|e| e.events_task) {
            task.abort();
        }
        generation
    }

    /// Remember the event loop driving this generation so removal can stop it.
    pub async fn attach_events_task(&self, session_id: Uuid, generation: u64, task: AbortHandle) {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&session_id) {
            Some(entry) if entry.generation == generation => entry.events_task = Some(task),
            _ => task.abort(),
        }
    }

    pub async fn get(&self, session_id: Uuid) -> Option<SessionSnapshot> {
        let entries = self.entries.read().await;
        entries.get(&session_id).map(|e| snapshot(session_id, e))
    }

    pub async fn is_current(&self, session_id: Uuid, generation: u64) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(&session_id)
            .is_some_and(|e| e.generation == generation)
    }

    /// Mutate the entry if it still belongs to `generation`.
    pub async fn update<F>(&self, session_id: Uuid, generation: u64, f: F) -> bool
    where
        F: FnOnce(EntryFields<'_>),
    {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&session_id) {
            Some(entry) if entry.generation == generation => {
                f(EntryFields {
                    status: &mut entry.status,
                    ready: &mut entry.ready,
                    pairing_artifact: &mut entry.pairing_artifact,
                });
                true
            }
            _ => false,
        }
    }

    /// Remove the entry and stop its event loop.
    pub async fn remove(&self, session_id: Uuid) -> Option<SessionSnapshot> {
        let removed = self.entries.write().await.remove(&session_id)?;
        Some(finish_removal(session_id, removed, true))
    }

    /// Remove the entry only if it still belongs to `generation`, stopping
    /// its event loop.
    pub async fn remove_generation(
        &self,
        session_id: Uuid,
        generation: u64,
    ) -> Option<SessionSnapshot> {
        self.take_generation(session_id, generation, true).await
    }

    /// Called by an event loop removing its own entry; the loop is already
    /// on its way out and must not be aborted mid-step.
    pub(crate) async fn detach_generation(
        &self,
        session_id: Uuid,
        generation: u64,
    ) -> Option<SessionSnapshot> {
        self.take_generation(session_id, generation, false).await
    }

    async fn take_generation(
        &self,
        session_id: Uuid,
        generation: u64,
        stop_events: bool,
    ) -> Option<SessionSnapshot> {
        let mut entries = self.entries.write().await;
        if entries.get(&session_id)?.generation != generation {
            return None;
        }
        let removed = entries.remove(&session_id)?;
        Some(finish_removal(session_id, removed, stop_events))
    }

    /// Point-in-time copy of every entry
    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let entries = self.entries.read().await;
        entries.iter().map(|(id, e)| snapshot(*id, e)).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn snapshot(session_id: Uuid, entry: &SessionEntry) -> SessionSnapshot {
    SessionSnapshot {
        session_id,
        handle: entry.handle.clone(),
        generation: entry.generation,
        status: entry.status,
        ready: entry.ready,
        pairing_artifact: entry.pairing_artifact.clone(),
    }
}

fn finish_removal(session_id: Uuid, entry: SessionEntry, stop_events: bool) -> SessionSnapshot {
    let snap = snapshot(session_id, &entry);
    if let Some(task) = entry.events_task.filter(|_| stop_events) {
        task.abort();
    }
    snap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::MockTransport;

    fn handle(id: Uuid) -> TransportHandle {
        TransportHandle::new(id, Arc::new(MockTransport::new()))
    }

    #[tokio::test]
    async fn test_register_get_remove() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();

        assert!(registry.get(id).await.is_none());

        let generation = registry.register(id, handle(id)).await;
        let snap = registry.get(id).await.unwrap();
        assert_eq!(snap.generation, generation);
        assert_eq!(snap.status, SessionStatus::Initializing);
        assert!(!snap.ready);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(id).await.is_some());
        assert!(registry.get(id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_update_or_remove() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();

        let old = registry.register(id, handle(id)).await;
        let new = registry.register(id, handle(id)).await;
        assert_ne!(old, new);

        let applied = registry
            .update(id, old, |fields| *fields.ready = true)
            .await;
        assert!(!applied);
        assert!(!registry.get(id).await.unwrap().ready);

        assert!(registry.remove_generation(id, old).await.is_none());
        assert!(registry.get(id).await.is_some());

        assert!(registry.remove_generation(id, new).await.is_some());
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_update_current_generation() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let generation = registry.register(id, handle(id)).await;

        let applied = registry
            .update(id, generation, |fields| {
                *fields.status = SessionStatus::Qr;
                *fields.pairing_artifact = Some("A".to_string());
            })
            .await;

        assert!(applied);
        let snap = registry.get(id).await.unwrap();
        assert_eq!(snap.status, SessionStatus::Qr);
        assert_eq!(snap.pairing_artifact.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_lock_serializes_same_id() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();

        let guard = registry.lock(id).await;
        let contender = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _guard = registry.lock(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_locks_for_different_ids_are_independent() {
        let registry = SessionRegistry::new();
        let _a = registry.lock(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), registry.lock(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_removal_aborts_events_task() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let generation = registry.register(id, handle(id)).await;

        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        registry
            .attach_events_task(id, generation, task.abort_handle())
            .await;

        registry.remove(id).await;
        let joined = task.await;
        assert!(joined.unwrap_err().is_cancelled());
    }

    fn lock_count(registry: &SessionRegistry) -> usize {
        registry.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_lock_entries_do_not_outlive_sessions() {
        let registry = SessionRegistry::new();

        for _ in 0..1000 {
            let id = Uuid::new_v4();
            let _guard = registry.lock(id).await;
            registry.register(id, handle(id)).await;
            registry.remove(id).await;
        }

        assert_eq!(lock_count(&registry), 0);
    }

    #[tokio::test]
    async fn test_contended_lock_is_kept_until_last_holder() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();

        let guard = registry.lock(id).await;
        let contender = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _guard = registry.lock(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(lock_count(&registry), 1);

        contender.await.unwrap();
        assert_eq!(lock_count(&registry), 0);
    }
}
