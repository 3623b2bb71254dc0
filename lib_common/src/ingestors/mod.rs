//! # Data Ingestors Module
//!
//! This module holds the streaming clients that bring measurement events into
//! the session. Each submodule handles connecting to one kind of source,
//! receiving its frames and managing the lifecycle of that connection.
//!
//! ## Contained Modules:
//! - **`measurement_wss`**: The WebSocket client for the measurement stream,
//!   together with the `StreamHandler` callback interface it drives.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The WebSocket client for the measurement stream.
pub mod measurement_wss;

// --- Public API Re-exports ---
pub use measurement_wss::{
    IngestError, MeasurementIngestor, StreamHandler, StreamSummary, TransportError, WsConfig,
    WsTransport,
};
