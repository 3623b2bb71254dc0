//! # Session Client
//!
//! Orchestrates one measurement session end to end:
//!
//! 1. **Liveness**: `GET api/health-check` must answer with a 2xx status.
//! 2. **Clock sync**: `GET api/timestamp-sync/{session_id}` must answer with a
//!    JSON body carrying `timestamp`, recorded alongside the local receive time.
//! 3. **Stream**: the measurement WebSocket is consumed until it closes; the
//!    ingestor's close handoff ends this phase.
//! 4. **Reconcile**: the pending identifiers are checked against the archive
//!    on a blocking task.
//!
//! Failures in steps 1 and 2 abort the run before any stream is opened.
//! Nothing in the orchestration retries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::archive::ArchiveConnector;
use crate::core::reconciler::{ArchiveReconciler, ReconcileError, ReconcileReport};
use crate::core::session_store::{SessionId, SessionStore};
use crate::core::stage::KeyValueStage;
use crate::ingestors::measurement_wss::{MeasurementIngestor, StreamSummary, WsConfig, WsTransport};
use crate::retrieve::ky_http::ApiClient;

/// Path of the liveness probe, relative to the server base URL.
pub const HEALTH_CHECK_PATH: &str = "api/health-check";
/// Path prefix of the clock synchronization call.
pub const TIMESTAMP_SYNC_PATH: &str = "api/timestamp-sync";

/// Default number of measurement cycles requested from the server.
pub const DEFAULT_CYCLE_AMOUNT: u32 = 5;
/// Default interval between measurements, in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 5000;

/// Fatal session failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The liveness probe answered with a non-success status.
    #[error("Liveness probe failed with HTTP status {status}")]
    Liveness {
        /// Status returned by the server.
        status: u16,
    },

    /// The clock synchronization call failed or returned no timestamp.
    #[error("Clock synchronization failed: {0}")]
    Sync(String),

    /// An HTTP request could not be executed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The session configuration is unusable.
    #[error("Invalid session configuration: {0}")]
    Config(String),

    /// The stream ended without delivering its close handoff.
    #[error("Measurement stream ended without a close handoff")]
    Handoff,

    /// Reconciliation hit a fatal condition.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// The blocking reconciliation task panicked or was cancelled.
    #[error("Reconciliation task failed: {0}")]
    Task(String),
}

/// Parameters of one measurement session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Host serving the HTTP API and the measurement stream.
    pub server_host: String,
    /// Port serving the HTTP API and the measurement stream.
    pub server_port: u16,
    /// Number of measurement cycles to request.
    pub cycle_amount: u32,
    /// Interval between measurements, in milliseconds.
    pub interval: u64,
    /// Room/channel the session joins.
    pub channel_name: String,
    /// Directory downloaded artifacts are written to.
    pub download_dir: PathBuf,
    /// Stream connection settings.
    pub ws: WsConfig,
    /// Archive login attempts (1 = no retry).
    pub login_attempts: u32,
    /// Delay before the second archive login attempt.
    pub login_base_delay: Duration,
}

impl SessionConfig {
    /// Creates a configuration for `channel_name` with every other value defaulted.
    pub fn new(channel_name: &str) -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8000,
            cycle_amount: DEFAULT_CYCLE_AMOUNT,
            interval: DEFAULT_INTERVAL_MS,
            channel_name: channel_name.to_string(),
            download_dir: PathBuf::from("downloads"),
            ws: WsConfig::default(),
            login_attempts: 1,
            login_base_delay: Duration::from_millis(1000),
        }
    }

    /// Base URL of the HTTP API.
    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}/", self.server_host, self.server_port)
    }

    /// Stream address with every session parameter encoded in the path.
    /// Each parameter is one percent-encoded path segment, so a channel name
    /// containing `/`, `?` or spaces cannot change the route.
    ///
    /// # Errors
    /// Returns `SessionError::Config` if the server address does not form a valid URL.
    pub fn stream_url(&self, session_id: SessionId) -> Result<String, SessionError> {
        let base = format!("ws://{}:{}/", self.server_host, self.server_port);
        let mut url = Url::parse(&base).map_err(|e| SessionError::Config(format!("{}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| SessionError::Config(format!("{} cannot carry a path", base)))?
            .pop_if_empty()
            .extend([
                "measurements".to_string(),
                self.cycle_amount.to_string(),
                self.interval.to_string(),
                session_id.to_string(),
                self.channel_name.clone(),
            ]);
        Ok(url.to_string())
    }
}

/// Server timestamp obtained at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockSync {
    /// `timestamp` as returned by the server.
    pub server_timestamp: Value,
    /// Local time the response was received.
    pub local_received_at: DateTime<Utc>,
}

/// Everything a completed session produced.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// The session's id.
    pub session_id: SessionId,
    /// Clock synchronization taken at startup.
    pub clock: ClockSync,
    /// Counters from the streaming phase.
    pub stream: StreamSummary,
    /// Reconciliation results.
    pub report: ReconcileReport,
}

#[derive(Debug, Deserialize)]
struct TimestampSyncBody {
    timestamp: Option<Value>,
}

/// Runs one measurement session against injected stage and archive backends.
pub struct SessionClient {
    config: SessionConfig,
    session_id: SessionId,
    stage: Arc<dyn KeyValueStage>,
    archive: Arc<dyn ArchiveConnector>,
    http: ApiClient,
    clock: Option<ClockSync>,
}

impl SessionClient {
    /// Creates a client with a freshly generated session id.
    ///
    /// # Errors
    /// Returns `SessionError::Config` if the channel name is empty or the
    /// server address does not form a valid URL.
    pub fn new(
        config: SessionConfig,
        stage: Arc<dyn KeyValueStage>,
        archive: Arc<dyn ArchiveConnector>,
    ) -> Result<Self, SessionError> {
        if config.channel_name.is_empty() {
            return Err(SessionError::Config("channel name is empty".to_string()));
        }
        let http = ApiClient::new(&config.http_base_url())
            .map_err(|e| SessionError::Config(e.to_string()))?;
        let session_id = SessionId::new();
        config.stream_url(session_id)?;

        Ok(Self {
            config,
            session_id,
            stage,
            archive,
            http,
            clock: None,
        })
    }

    /// This session's id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The clock synchronization, once taken.
    pub fn clock(&self) -> Option<&ClockSync> {
        self.clock.as_ref()
    }

    /// Runs liveness, clock sync, streaming and reconciliation in order.
    pub async fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        log::info!("Starting measurement session {}", self.session_id);

        self.check_liveness().await?;
        let clock = self.sync_clock().await?;

        let store = Arc::new(SessionStore::new(self.session_id, self.stage.clone()));
        let stream = self.measure(store.clone()).await?;
        let report = self.reconcile(store).await?;

        Ok(SessionOutcome {
            session_id: self.session_id,
            clock,
            stream,
            report,
        })
    }

    /// Probes the server's health endpoint.
    pub async fn check_liveness(&self) -> Result<(), SessionError> {
        let status = self
            .http
            .probe(HEALTH_CHECK_PATH)
            .await
            .map_err(|e| SessionError::Http(e.to_string()))?;

        if !(200..300).contains(&status) {
            log::error!("Health check returned HTTP {}", status);
            return Err(SessionError::Liveness { status });
        }
        log::info!("Health check OK ({})", status);
        Ok(())
    }

    /// Fetches and records the server timestamp for this session.
    pub async fn sync_clock(&mut self) -> Result<ClockSync, SessionError> {
        let path = format!("{}/{}", TIMESTAMP_SYNC_PATH, self.session_id);
        let response = self
            .http
            .get_json::<TimestampSyncBody>(&path)
            .await
            .map_err(|e| SessionError::Sync(e.to_string()))?;

        if !response.success {
            return Err(SessionError::Sync(format!("HTTP status {}", response.status)));
        }
        let server_timestamp = response
            .data
            .and_then(|body| body.timestamp)
            .ok_or_else(|| SessionError::Sync("response has no 'timestamp' field".to_string()))?;

        let clock = ClockSync {
            server_timestamp,
            local_received_at: Utc::now(),
        };
        log::info!(
            "Server timestamp {} received at {}",
            clock.server_timestamp,
            clock.local_received_at.to_rfc3339()
        );
        self.clock = Some(clock.clone());
        Ok(clock)
    }

    /// Consumes the measurement stream into `store` until it closes.
    pub async fn measure(&self, store: Arc<SessionStore>) -> Result<StreamSummary, SessionError> {
        let (mut ingestor, handoff) = MeasurementIngestor::new(store);
        let transport = WsTransport::new(self.config.ws.clone());

        let url = self.config.stream_url(self.session_id)?;
        transport.run_forever(&url, &mut ingestor).await;

        handoff.await.map_err(|_| SessionError::Handoff)
    }

    async fn reconcile(&self, store: Arc<SessionStore>) -> Result<ReconcileReport, SessionError> {
        let reconciler = ArchiveReconciler::new(self.archive.clone(), self.config.download_dir.clone())
            .with_login_retry(self.config.login_attempts, self.config.login_base_delay);

        let report = tokio::task::spawn_blocking(move || reconciler.reconcile(&store))
            .await
            .map_err(|e| SessionError::Task(e.to_string()))??;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::MemoryArchive;
    use crate::core::stage::MemoryStage;

    #[test]
    fn test_stream_url_encodes_parameters() {
        let mut config = SessionConfig::new("room-1");
        config.server_port = 9000;
        let id = SessionId::new();

        assert_eq!(
            config.stream_url(id).unwrap(),
            format!("ws://127.0.0.1:9000/measurements/5/5000/{}/room-1", id)
        );
        assert_eq!(config.http_base_url(), "http://127.0.0.1:9000/");
    }

    #[test]
    fn test_channel_name_is_a_single_path_segment() {
        let config = SessionConfig::new("lab a/b?x");
        let id = SessionId::new();

        assert_eq!(
            config.stream_url(id).unwrap(),
            format!("ws://127.0.0.1:8000/measurements/5/5000/{}/lab%20a%2Fb%3Fx", id)
        );
    }

    #[test]
    fn test_invalid_server_host_is_rejected() {
        let mut config = SessionConfig::new("room");
        config.server_host = "bad host".to_string();

        let result = SessionClient::new(
            config,
            Arc::new(MemoryStage::new()),
            Arc::new(MemoryArchive::new()),
        );
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_empty_channel_is_rejected() {
        let result = SessionClient::new(
            SessionConfig::new(""),
            Arc::new(MemoryStage::new()),
            Arc::new(MemoryArchive::new()),
        );
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_each_client_gets_its_own_session_id() {
        let stage: Arc<dyn KeyValueStage> = Arc::new(MemoryStage::new());
        let archive: Arc<dyn ArchiveConnector> = Arc::new(MemoryArchive::new());
        let a = SessionClient::new(SessionConfig::new("r"), stage.clone(), archive.clone()).unwrap();
        let b = SessionClient::new(SessionConfig::new("r"), stage, archive).unwrap();
        assert_ne!(a.session_id(), b.session_id());
        assert!(a.clock().is_none());
    }
}
