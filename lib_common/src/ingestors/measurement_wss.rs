//! # Measurement WSS Ingestor
//!
//! WebSocket ingestor for the measurement stream.
//! Location: lib_common/src/ingestors/measurement_wss.rs
//!
//! The transport (`WsTransport`) owns the socket and drives a `StreamHandler`
//! through `on_open` / `on_message` / `on_error` / `on_close`. The ingestor
//! (`MeasurementIngestor`) implements the handler with plain synchronous
//! logic, so it can be driven directly in tests without a socket.
//!
//! Closing the stream is the only trigger for reconciliation: the ingestor
//! hands a `StreamSummary` over a oneshot channel the first time `on_close`
//! runs and ignores any later call.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

use crate::core::frame::{FrameError, MeasurementFrame};
use crate::core::session_store::SessionStore;
use crate::core::stage::StageError;

/// Streaming connection failures. Logged; they end the session but never the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Every connection attempt failed.
    #[error("Failed to connect to {url} after {attempts} attempt(s): {reason}")]
    Connect {
        /// Target address.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },

    /// The open connection failed while reading.
    #[error("WSS read error: {0}")]
    Read(String),
}

/// Why a single inbound frame was not staged.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The frame could not be decoded (MalformedFrameError).
    #[error(transparent)]
    Malformed(#[from] FrameError),

    /// The stage rejected the write.
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Callbacks invoked by a stream transport, strictly one at a time.
pub trait StreamHandler {
    /// The connection is established.
    fn on_open(&mut self);
    /// A text frame arrived.
    fn on_message(&mut self, text: &str);
    /// The transport hit an error.
    fn on_error(&mut self, error: &TransportError);
    /// The stream ended, normally or not.
    fn on_close(&mut self);
}

/// Counters for one streaming phase, handed to the reconciliation step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Frames decoded and staged.
    pub accepted: usize,
    /// Frames dropped as malformed or unstageable.
    pub dropped: usize,
    /// Transport errors reported through `on_error`.
    pub transport_errors: usize,
}

/// Stages every valid measurement frame into the session store.
pub struct MeasurementIngestor {
    store: Arc<SessionStore>,
    summary: StreamSummary,
    handoff: Option<oneshot::Sender<StreamSummary>>,
}

impl MeasurementIngestor {
    /// Creates an ingestor over `store` and the receiver its close handoff arrives on.
    pub fn new(store: Arc<SessionStore>) -> (Self, oneshot::Receiver<StreamSummary>) {
        let (tx, rx) = oneshot::channel();
        let ingestor = Self {
            store,
            summary: StreamSummary::default(),
            handoff: Some(tx),
        };
        (ingestor, rx)
    }

    /// Decodes one frame, stages its payload and records its identifier.
    pub fn ingest(&mut self, text: &str) -> Result<MeasurementFrame, IngestError> {
        let frame = MeasurementFrame::decode(text)?;
        self.store
            .stage_payload(&frame.file_identifier, &frame.timestamp_data)?;
        Ok(frame)
    }

    /// Counters so far.
    pub fn summary(&self) -> &StreamSummary {
        &self.summary
    }

    /// `true` once the close handoff has fired.
    pub fn is_closed(&self) -> bool {
        self.handoff.is_none()
    }
}

impl StreamHandler for MeasurementIngestor {
    fn on_open(&mut self) {
        log::info!("Measurement stream opened for session {}", self.store.session_id());
    }

    fn on_message(&mut self, text: &str) {
        log::trace!("Received text frame: {}", text);
        match self.ingest(text) {
            Ok(frame) => {
                self.summary.accepted += 1;
                log::debug!("{} -> {}", frame.file_identifier, frame.timestamp_data);
            }
            Err(e) => {
                self.summary.dropped += 1;
                log::warn!("Dropping frame: {}", e);
            }
        }
    }

    fn on_error(&mut self, error: &TransportError) {
        self.summary.transport_errors += 1;
        log::error!("{}", error);
    }

    fn on_close(&mut self) {
        let Some(handoff) = self.handoff.take() else {
            log::warn!("Ignoring repeated close for session {}", self.store.session_id());
            return;
        };
        log::info!(
            "Measurement stream closed: {} accepted, {} dropped, {} pending",
            self.summary.accepted,
            self.summary.dropped,
            self.store.pending_len()
        );
        if handoff.send(self.summary.clone()).is_err() {
            log::warn!("Close handoff receiver dropped; reconciliation will not run.");
        }
    }
}

/// Connection settings for `WsTransport`.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection attempts before giving up (at least 1).
    pub connect_attempts: u32,
    /// Delay before the second attempt; doubled after each failure.
    pub reconnect_base_delay: Duration,
    /// Upper bound for the retry delay.
    pub reconnect_max_delay: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 1,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(30000),
        }
    }
}

/// WebSocket transport that drives a `StreamHandler` until the stream ends.
pub struct WsTransport {
    config: WsConfig,
}

impl WsTransport {
    /// Creates a transport with the given connection settings.
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Connects to `url` and feeds every frame to `handler` until the remote
    /// closes or a read fails. `on_close` is called exactly once on every
    /// path, including when the connection never opens.
    pub async fn run_forever<H: StreamHandler + ?Sized>(&self, url: &str, handler: &mut H) {
        let ws_stream = match self.connect(url).await {
            Ok(stream) => stream,
            Err(e) => {
                handler.on_error(&e);
                handler.on_close();
                return;
            }
        };

        handler.on_open();
        let (mut write, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => handler.on_message(text.as_str()),
                // Invalid UTF-8 still reaches the handler, where it fails to decode.
                Ok(Message::Binary(bin)) => handler.on_message(&String::from_utf8_lossy(&bin)),
                Ok(Message::Close(frame)) => {
                    log::info!("WSS stream closed by remote host: {:?}", frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    handler.on_error(&TransportError::Read(e.to_string()));
                    break;
                }
            }
        }

        // Best effort; the socket may already be gone.
        let _ = write.close().await;
        handler.on_close();
    }

    async fn connect(
        &self,
        url: &str,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, TransportError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut delay = self.config.reconnect_base_delay;
        let mut attempt = 1;

        loop {
            log::info!("Connecting to measurement stream: {}", url);
            match connect_async(url).await {
                Ok((ws_stream, _)) => {
                    log::info!("Successfully connected to measurement stream.");
                    return Ok(ws_stream);
                }
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "Connect attempt {}/{} failed: {}. Retrying in {}ms...",
                        attempt,
                        attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2).min(self.config.reconnect_max_delay);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(TransportError::Connect {
                        url: url.to_string(),
                        attempts: attempt,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}
