//! # Session Store
//!
//! Owns the two pieces of mutable state a measurement session shares between
//! its streaming phase and its reconciliation phase: the stage handle and the
//! ordered list of identifiers still waiting to be reconciled.
//!
//! One store is created per session. The pending list is guarded by a mutex
//! because the transport callbacks and the reconciliation task may run on
//! different runtime threads.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use super::stage::{KeyValueStage, StageError};

/// Unique token identifying one run of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-scoped stage handle plus pending-identifier list.
pub struct SessionStore {
    session_id: SessionId,
    stage: Arc<dyn KeyValueStage>,
    pending: Mutex<Vec<String>>,
}

impl SessionStore {
    /// Creates a store with an empty pending list over `stage`.
    pub fn new(session_id: SessionId, stage: Arc<dyn KeyValueStage>) -> Self {
        Self {
            session_id,
            stage,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// The session this store belongs to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The shared stage handle.
    pub fn stage(&self) -> &dyn KeyValueStage {
        self.stage.as_ref()
    }

    /// Writes `payload` under `id` and records `id` as pending.
    ///
    /// The identifier is appended only once the stage accepted the payload,
    /// so every pending identifier always has a staged value. A repeated
    /// identifier overwrites its payload but keeps its first position.
    pub fn stage_payload(&self, id: &str, payload: &str) -> Result<(), StageError> {
        self.stage.set(id, payload)?;
        let mut pending = self.lock_pending();
        if !pending.iter().any(|p| p == id) {
            pending.push(id.to_string());
        }
        Ok(())
    }

    /// Copy of the pending identifiers in arrival order.
    pub fn pending_snapshot(&self) -> Vec<String> {
        self.lock_pending().clone()
    }

    /// Number of pending identifiers.
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Deletes every identifier in `ids` from the stage and empties the
    /// pending list. Returns the number of stage deletes that failed.
    pub fn purge(&self, ids: &[String]) -> usize {
        let mut failures = 0;
        for id in ids {
            if let Err(e) = self.stage.delete(id) {
                log::error!("Failed to purge staged payload '{}': {}", id, e);
                failures += 1;
            }
        }
        self.lock_pending().clear();
        failures
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<String>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::MemoryStage;

    #[test]
    fn test_stage_payload_records_arrival_order() {
        let stage = Arc::new(MemoryStage::new());
        let store = SessionStore::new(SessionId::new(), stage.clone());

        store.stage_payload("b", "2").unwrap();
        store.stage_payload("a", "1").unwrap();

        assert_eq!(store.pending_snapshot(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(stage.get("a").unwrap(), "1");
    }

    #[test]
    fn test_repeated_identifier_is_pending_once() {
        let stage = Arc::new(MemoryStage::new());
        let store = SessionStore::new(SessionId::new(), stage.clone());

        store.stage_payload("a", "1").unwrap();
        store.stage_payload("b", "2").unwrap();
        store.stage_payload("a", "3").unwrap();

        assert_eq!(store.pending_snapshot(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(stage.len(), store.pending_len());
        assert_eq!(stage.get("a").unwrap(), "3");
    }

    #[test]
    fn test_purge_empties_stage_and_pending() {
        let stage = Arc::new(MemoryStage::new());
        let store = SessionStore::new(SessionId::new(), stage.clone());
        store.stage_payload("a", "1").unwrap();
        store.stage_payload("b", "2").unwrap();

        let ids = store.pending_snapshot();
        assert_eq!(store.purge(&ids), 0);
        assert!(stage.is_empty());
        assert_eq!(store.pending_len(), 0);

        // Second purge is a no-op.
        assert_eq!(store.purge(&ids), 0);
    }

    #[test]
    fn test_sessions_do_not_share_pending_lists() {
        let stage = Arc::new(MemoryStage::new());
        let first = SessionStore::new(SessionId::new(), stage.clone());
        let second = SessionStore::new(SessionId::new(), stage.clone());

        first.stage_payload("a", "1").unwrap();
        second.stage_payload("b", "2").unwrap();

        assert_eq!(first.pending_snapshot(), vec!["a".to_string()]);
        assert_eq!(second.pending_snapshot(), vec!["b".to_string()]);
        assert_ne!(first.session_id(), second.session_id());
    }
}
