//! # Key-Value Stage
//!
//! The stage is the short-lived cache that holds each measurement payload
//! between its arrival on the stream and its reconciliation against the
//! archive. Semantics are deliberately minimal: last write wins, reads of a
//! missing key fail, deletes are idempotent.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

/// Errors raised by a `KeyValueStage` implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    /// No payload is staged under the requested identifier.
    #[error("No staged payload for identifier '{0}'")]
    NotFound(String),

    /// The backing service (e.g. Redis) failed to execute the operation.
    #[error("Stage backend failure: {0}")]
    Backend(String),
}

/// A mapping from identifier to staged payload.
///
/// Methods take `&self` so a single handle can be shared as
/// `Arc<dyn KeyValueStage>` between the ingestor and the reconciler.
pub trait KeyValueStage: Send + Sync {
    /// Stores `value` under `id`, overwriting any previous value.
    fn set(&self, id: &str, value: &str) -> Result<(), StageError>;

    /// Returns the value stored under `id`.
    ///
    /// # Errors
    /// Returns `StageError::NotFound` if nothing is staged under `id`.
    fn get(&self, id: &str) -> Result<String, StageError>;

    /// Removes `id` from the stage. Deleting an absent key is not an error.
    fn delete(&self, id: &str) -> Result<(), StageError>;
}

/// In-process stage backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStage {
    /// Creates an empty stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map; keep serving it.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStage for MemoryStage {
    fn set(&self, id: &str, value: &str) -> Result<(), StageError> {
        self.lock().insert(id.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<String, StageError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StageError::NotFound(id.to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), StageError> {
        self.lock().remove(id);
        Ok(())
    }
}
