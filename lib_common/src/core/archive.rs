//! # Archive Transport Seam
//!
//! The reconciler fetches authoritative copies of staged payloads from a
//! file-retrieval service. The service is reached through two traits so the
//! FTP implementation can be swapped for an in-memory one in tests:
//! an `ArchiveConnector` opens authenticated `ArchiveSession`s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Failures talking to the archive service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    /// The service could not be reached.
    #[error("Archive connection failed: {0}")]
    Connection(String),

    /// The service rejected the credentials.
    #[error("Archive authentication failed: {0}")]
    Authentication(String),

    /// A single artifact could not be retrieved.
    #[error("Failed to retrieve '{name}': {reason}")]
    Retrieval {
        /// Remote file name.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// Closing the session failed.
    #[error("Archive disconnect failed: {0}")]
    Disconnect(String),
}

/// Opens authenticated sessions against the archive.
pub trait ArchiveConnector: Send + Sync {
    /// Connects and logs in.
    fn connect(&self) -> Result<Box<dyn ArchiveSession>, ArchiveError>;
}

impl<T: ArchiveConnector + ?Sized> ArchiveConnector for Arc<T> {
    fn connect(&self) -> Result<Box<dyn ArchiveSession>, ArchiveError> {
        (**self).connect()
    }
}

/// An open, authenticated archive session.
pub trait ArchiveSession: Send {
    /// Downloads the remote file `name` in full.
    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError>;

    /// Ends the session.
    fn quit(self: Box<Self>) -> Result<(), ArchiveError>;
}

#[derive(Debug, Default)]
struct MemoryArchiveState {
    files: HashMap<String, Vec<u8>>,
    reject_login: bool,
    logins: usize,
    retrievals: Vec<String>,
    open_sessions: usize,
}

/// In-memory archive. Clones share the same state, so a test can keep one
/// handle for inspection while the reconciler owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    state: Arc<Mutex<MemoryArchiveState>>,
}

impl MemoryArchive {
    /// Creates an empty archive that accepts logins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `contents` under `name`.
    pub fn insert(&self, name: &str, contents: impl Into<Vec<u8>>) {
        self.lock().files.insert(name.to_string(), contents.into());
    }

    /// Makes every subsequent login fail with `ArchiveError::Authentication`.
    pub fn reject_logins(&self, reject: bool) {
        self.lock().reject_login = reject;
    }

    /// Number of login attempts seen so far.
    pub fn login_count(&self) -> usize {
        self.lock().logins
    }

    /// Remote names requested so far, in request order.
    pub fn retrievals(&self) -> Vec<String> {
        self.lock().retrievals.clone()
    }

    /// Number of sessions opened but not yet quit.
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryArchiveState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ArchiveConnector for MemoryArchive {
    fn connect(&self) -> Result<Box<dyn ArchiveSession>, ArchiveError> {
        let mut state = self.lock();
        state.logins += 1;
        if state.reject_login {
            return Err(ArchiveError::Authentication("530 Login incorrect.".to_string()));
        }
        state.open_sessions += 1;
        Ok(Box::new(MemoryArchiveSession {
            archive: self.clone(),
        }))
    }
}

struct MemoryArchiveSession {
    archive: MemoryArchive,
}

impl ArchiveSession for MemoryArchiveSession {
    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut state = self.archive.lock();
        state.retrievals.push(name.to_string());
        state
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| ArchiveError::Retrieval {
                name: name.to_string(),
                reason: "550 No such file or directory.".to_string(),
            })
    }

    fn quit(self: Box<Self>) -> Result<(), ArchiveError> {
        let mut state = self.archive.lock();
        state.open_sessions = state.open_sessions.saturating_sub(1);
        Ok(())
    }
}
