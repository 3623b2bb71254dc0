//! # Archive Reconciler
//!
//! Runs once per session, after the stream has closed. It works through the
//! pending identifiers in arrival order in three strictly sequential phases:
//!
//! 1. **Retrieve**: read each staged payload, download `{id}.txt` from the
//!    archive into the download directory (overwriting), then quit the
//!    archive session.
//! 2. **Compare**: re-read every downloaded artifact from disk and compare it
//!    byte-for-byte with its staged payload. Divergence is reported, never fatal.
//! 3. **Purge**: delete every pending identifier from the stage and clear the
//!    pending list. This phase runs on every exit path, including fatal ones.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use super::archive::{ArchiveConnector, ArchiveError, ArchiveSession};
use super::session_store::SessionStore;
use super::stage::StageError;

/// Suffix appended to an identifier to form the remote and local file name.
pub const ARTIFACT_SUFFIX: &str = ".txt";

/// Fatal reconciliation failures. Each of these aborts the pass; the stage
/// has already been purged when one is returned.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Logging into the archive failed after every allowed attempt.
    #[error("Archive login failed after {attempts} attempt(s): {source}")]
    Authentication {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: ArchiveError,
    },

    /// A pending identifier had no staged payload.
    #[error("Pending identifier '{0}' has no staged payload")]
    MissingStaged(String),

    /// The stage backend failed while reading a payload.
    #[error("Stage read failed: {0}")]
    Stage(#[from] StageError),

    /// The download directory could not be prepared.
    #[error("Download directory {path:?} unavailable: {source}")]
    DownloadDir {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

/// A staged payload that differs from its archived copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Identifier of the diverging event.
    pub identifier: String,
    /// Value held in the stage.
    pub staged: String,
    /// Archived content, decoded lossily as UTF-8.
    pub archived: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Artifacts downloaded and written locally.
    pub retrieved: usize,
    /// Artifacts compared against the stage.
    pub compared: usize,
    /// Identifiers whose artifact differs from the staged payload.
    pub mismatches: Vec<Mismatch>,
    /// Identifiers whose artifact could not be obtained; skipped in comparison.
    pub missing: Vec<String>,
    /// Stage deletes that failed during the purge.
    pub purge_failures: usize,
}

impl ReconcileReport {
    /// `true` when every identifier was retrieved and matched.
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.missing.is_empty()
    }
}

/// Retrieves, compares and purges the pending identifiers of a session.
pub struct ArchiveReconciler<C: ArchiveConnector> {
    connector: C,
    download_dir: PathBuf,
    login_attempts: u32,
    login_base_delay: Duration,
}

impl<C: ArchiveConnector> ArchiveReconciler<C> {
    /// Creates a reconciler that writes artifacts into `download_dir` and
    /// tries to log in exactly once.
    pub fn new(connector: C, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            connector,
            download_dir: download_dir.into(),
            login_attempts: 1,
            login_base_delay: Duration::from_millis(1000),
        }
    }

    /// Allows up to `attempts` logins, doubling `base_delay` between them.
    pub fn with_login_retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.login_attempts = attempts.max(1);
        self.login_base_delay = base_delay;
        self
    }

    /// Local path an identifier's artifact is written to.
    pub fn artifact_path(&self, identifier: &str) -> PathBuf {
        self.download_dir.join(artifact_name(identifier))
    }

    /// Runs the full pass over the store's pending identifiers.
    ///
    /// Blocks on network and disk I/O; call it from a blocking context.
    pub fn reconcile(&self, store: &SessionStore) -> Result<ReconcileReport, ReconcileError> {
        let ids = store.pending_snapshot();
        log::info!(
            "Reconciling {} pending identifier(s) for session {}",
            ids.len(),
            store.session_id()
        );

        let result = self.retrieve_and_compare(store, &ids);

        let purge_failures = store.purge(&ids);
        if purge_failures > 0 {
            log::warn!("{} staged payload(s) could not be purged", purge_failures);
        }

        result.map(|mut report| {
            report.purge_failures = purge_failures;
            log::info!(
                "Reconciliation finished: retrieved={} compared={} mismatches={} missing={}",
                report.retrieved,
                report.compared,
                report.mismatches.len(),
                report.missing.len()
            );
            report
        })
    }

    fn retrieve_and_compare(
        &self,
        store: &SessionStore,
        ids: &[String],
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();
        if ids.is_empty() {
            log::debug!("Nothing pending; archive login skipped.");
            return Ok(report);
        }

        let mut session = self.login()?;

        // --- Phase 1: Retrieve every artifact before any comparison ---
        let retrieved = match self.retrieve_all(store, session.as_mut(), ids, &mut report) {
            Ok(retrieved) => retrieved,
            Err(e) => {
                close_session(session);
                return Err(e);
            }
        };
        close_session(session);

        // --- Phase 2: Compare local artifacts against the stage ---
        for (id, staged) in retrieved {
            let path = self.artifact_path(&id);
            let archived = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("Failed to re-read artifact {}: {}", path.display(), e);
                    report.missing.push(id);
                    continue;
                }
            };
            report.compared += 1;

            if archived != staged.as_bytes() {
                let archived = String::from_utf8_lossy(&archived).into_owned();
                log::warn!(
                    "Mismatch for '{}': staged={:?} archived={:?}",
                    id,
                    staged,
                    archived
                );
                report.mismatches.push(Mismatch {
                    identifier: id,
                    staged,
                    archived,
                });
            }
        }

        Ok(report)
    }

    fn retrieve_all(
        &self,
        store: &SessionStore,
        session: &mut dyn ArchiveSession,
        ids: &[String],
        report: &mut ReconcileReport,
    ) -> Result<Vec<(String, String)>, ReconcileError> {
        fs::create_dir_all(&self.download_dir).map_err(|source| ReconcileError::DownloadDir {
            path: self.download_dir.clone(),
            source,
        })?;

        let mut retrieved = Vec::with_capacity(ids.len());
        for id in ids {
            let staged = match store.stage().get(id) {
                Ok(value) => value,
                Err(StageError::NotFound(_)) => {
                    log::error!("Pending identifier '{}' is not staged", id);
                    return Err(ReconcileError::MissingStaged(id.clone()));
                }
                Err(e) => return Err(e.into()),
            };

            if !is_safe_identifier(id) {
                log::error!("Refusing to download artifact for unsafe identifier {:?}", id);
                report.missing.push(id.clone());
                continue;
            }

            let name = artifact_name(id);
            match session.retrieve(&name) {
                Ok(bytes) => {
                    let path = self.artifact_path(id);
                    if let Err(e) = write_artifact(&path, &bytes) {
                        log::error!("Failed to write artifact {}: {}", path.display(), e);
                        report.missing.push(id.clone());
                        continue;
                    }
                    log::debug!("Retrieved {} ({} bytes)", name, bytes.len());
                    report.retrieved += 1;
                    retrieved.push((id.clone(), staged));
                }
                Err(e) => {
                    log::error!("{}", e);
                    report.missing.push(id.clone());
                }
            }
        }
        Ok(retrieved)
    }

    fn login(&self) -> Result<Box<dyn ArchiveSession>, ReconcileError> {
        let mut delay = self.login_base_delay;
        let mut attempt = 1;
        loop {
            match self.connector.connect() {
                Ok(session) => return Ok(session),
                Err(e) if attempt < self.login_attempts && is_retryable(&e) => {
                    log::warn!(
                        "Archive login attempt {}/{} failed: {}. Retrying in {}ms...",
                        attempt,
                        self.login_attempts,
                        e,
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(source) => {
                    log::error!("Archive login failed: {}", source);
                    return Err(ReconcileError::Authentication {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}

fn artifact_name(identifier: &str) -> String {
    format!("{}{}", identifier, ARTIFACT_SUFFIX)
}

fn is_safe_identifier(identifier: &str) -> bool {
    !identifier.contains(['/', '\\']) && identifier != "." && identifier != ".."
}

fn is_retryable(error: &ArchiveError) -> bool {
    matches!(
        error,
        ArchiveError::Authentication(_) | ArchiveError::Connection(_)
    )
}

fn write_artifact(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(path, bytes)
}

fn close_session(session: Box<dyn ArchiveSession>) {
    if let Err(e) = session.quit() {
        log::warn!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::MemoryArchive;
    use crate::core::session_store::SessionId;
    use crate::core::stage::{KeyValueStage, MemoryStage};
    use std::sync::{Arc, Mutex};

    fn store_with(entries: &[(&str, &str)]) -> (Arc<MemoryStage>, SessionStore) {
        let stage = Arc::new(MemoryStage::new());
        let store = SessionStore::new(SessionId::new(), stage.clone());
        for (id, payload) in entries {
            store.stage_payload(id, payload).unwrap();
        }
        (stage, store)
    }

    #[test]
    fn test_matching_artifact_reports_no_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, store) = store_with(&[("abc123", "1700000000")]);
        let archive = MemoryArchive::new();
        archive.insert("abc123.txt", "1700000000");

        let reconciler = ArchiveReconciler::new(archive.clone(), dir.path());
        let report = reconciler.reconcile(&store).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.retrieved, 1);
        assert_eq!(report.compared, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("abc123.txt")).unwrap(),
            "1700000000"
        );
        assert!(stage.is_empty());
        assert_eq!(store.pending_len(), 0);
        assert_eq!(archive.open_sessions(), 0);
    }

    #[test]
    fn test_mismatch_is_reported_and_processing_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, store) = store_with(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let archive = MemoryArchive::new();
        archive.insert("a.txt", "1");
        archive.insert("b.txt", "999");
        archive.insert("c.txt", "3");

        let report = ArchiveReconciler::new(archive, dir.path())
            .reconcile(&store)
            .unwrap();

        assert_eq!(report.compared, 3);
        assert_eq!(
            report.mismatches,
            vec![Mismatch {
                identifier: "b".to_string(),
                staged: "2".to_string(),
                archived: "999".to_string(),
            }]
        );
        assert!(stage.is_empty());
    }

    #[test]
    fn test_missing_artifact_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, store) = store_with(&[("a", "1"), ("gone", "2"), ("c", "3")]);
        let archive = MemoryArchive::new();
        archive.insert("a.txt", "1");
        archive.insert("c.txt", "3");

        let report = ArchiveReconciler::new(archive.clone(), dir.path())
            .reconcile(&store)
            .unwrap();

        assert_eq!(report.missing, vec!["gone".to_string()]);
        assert_eq!(report.retrieved, 2);
        assert_eq!(report.compared, 2);
        assert!(report.mismatches.is_empty());
        assert_eq!(archive.retrievals(), vec!["a.txt", "gone.txt", "c.txt"]);
        assert!(stage.is_empty());
    }

    #[test]
    fn test_repeated_identifier_is_reconciled_once() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, store) = store_with(&[("a", "1"), ("a", "2")]);
        let archive = MemoryArchive::new();
        archive.insert("a.txt", "2");

        let report = ArchiveReconciler::new(archive.clone(), dir.path())
            .reconcile(&store)
            .unwrap();

        assert_eq!(archive.retrievals(), vec!["a.txt"]);
        assert_eq!(report.retrieved, 1);
        assert_eq!(report.compared, 1);
        assert!(report.is_clean());
        assert!(stage.is_empty());
    }

    #[test]
    fn test_existing_local_copy_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "stale").unwrap();
        let (_stage, store) = store_with(&[("a", "fresh")]);
        let archive = MemoryArchive::new();
        archive.insert("a.txt", "fresh");

        let report = ArchiveReconciler::new(archive, dir.path())
            .reconcile(&store)
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "fresh");
    }

    #[test]
    fn test_authentication_failure_is_fatal_and_purges() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, store) = store_with(&[("a", "1")]);
        let archive = MemoryArchive::new();
        archive.reject_logins(true);

        let err = ArchiveReconciler::new(archive.clone(), dir.path())
            .reconcile(&store)
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Authentication { attempts: 1, .. }));
        assert!(archive.retrievals().is_empty());
        assert!(stage.is_empty());
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_login_retry_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let (_stage, store) = store_with(&[("a", "1")]);
        let archive = MemoryArchive::new();
        archive.reject_logins(true);

        let err = ArchiveReconciler::new(archive.clone(), dir.path())
            .with_login_retry(3, Duration::from_millis(1))
            .reconcile(&store)
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Authentication { attempts: 3, .. }));
        assert_eq!(archive.login_count(), 3);
    }

    #[test]
    fn test_unstaged_pending_identifier_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, store) = store_with(&[("a", "1"), ("b", "2")]);
        // Simulate an external eviction between streaming and reconciliation.
        stage.delete("b").unwrap();
        let archive = MemoryArchive::new();
        archive.insert("a.txt", "1");
        archive.insert("b.txt", "2");

        let err = ArchiveReconciler::new(archive.clone(), dir.path())
            .reconcile(&store)
            .unwrap_err();

        assert!(matches!(err, ReconcileError::MissingStaged(ref id) if id == "b"));
        assert_eq!(archive.open_sessions(), 0);
        assert!(stage.is_empty());
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_empty_pending_list_skips_login() {
        let dir = tempfile::tempdir().unwrap();
        let (_stage, store) = store_with(&[]);
        let archive = MemoryArchive::new();

        let report = ArchiveReconciler::new(archive.clone(), dir.path())
            .reconcile(&store)
            .unwrap();

        assert_eq!(report, ReconcileReport::default());
        assert_eq!(archive.login_count(), 0);
    }

    /// Connector recording every archive call, to check phase ordering.
    struct TracingConnector {
        trace: Arc<Mutex<Vec<String>>>,
        inner: MemoryArchive,
    }

    struct TracingSession {
        trace: Arc<Mutex<Vec<String>>>,
        inner: Box<dyn ArchiveSession>,
    }

    impl ArchiveConnector for TracingConnector {
        fn connect(&self) -> Result<Box<dyn ArchiveSession>, ArchiveError> {
            self.trace.lock().unwrap().push("login".to_string());
            Ok(Box::new(TracingSession {
                trace: self.trace.clone(),
                inner: self.inner.connect()?,
            }))
        }
    }

    impl ArchiveSession for TracingSession {
        fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
            self.trace.lock().unwrap().push(format!("retrieve {}", name));
            self.inner.retrieve(name)
        }

        fn quit(self: Box<Self>) -> Result<(), ArchiveError> {
            self.trace.lock().unwrap().push("quit".to_string());
            self.inner.quit()
        }
    }

    #[test]
    fn test_all_retrievals_precede_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let (_stage, store) = store_with(&[("x", "1"), ("y", "2"), ("z", "3")]);
        let inner = MemoryArchive::new();
        for (name, body) in [("x.txt", "1"), ("y.txt", "2"), ("z.txt", "3")] {
            inner.insert(name, body);
        }
        let trace = Arc::new(Mutex::new(Vec::new()));
        let connector = TracingConnector {
            trace: trace.clone(),
            inner,
        };

        let report = ArchiveReconciler::new(connector, dir.path())
            .reconcile(&store)
            .unwrap();

        assert_eq!(report.retrieved, 3);
        assert_eq!(report.compared, 3);
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["login", "retrieve x.txt", "retrieve y.txt", "retrieve z.txt", "quit"]
        );
    }
}
