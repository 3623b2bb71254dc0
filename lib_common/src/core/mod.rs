//! # Core Engine Module
//!
//! This module forms the heart of the measurement client. It holds every piece
//! of the staged reconciliation pipeline that does not depend on a concrete
//! network library, so the whole flow can be exercised without a live socket.
//!
//! ## Core Components:
//!
//! - **`stage`**: The `KeyValueStage` abstraction over the short-lived cache
//!   that holds each payload between arrival and reconciliation.
//!
//! - **`session_store`**: A session-scoped owner of the stage handle and the
//!   ordered list of pending identifiers.
//!
//! - **`frame`**: Pure decoding of inbound measurement frames.
//!
//! - **`archive`**: The `ArchiveConnector` / `ArchiveSession` seam over the
//!   file-retrieval service.
//!
//! - **`reconciler`**: Fetches the archived copies, compares them with the
//!   staged payloads and purges the stage.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The key-value staging abstraction and its in-memory implementation.
pub mod stage;
/// Session-scoped stage handle and pending-identifier list.
pub mod session_store;
/// Decoding of inbound measurement frames.
pub mod frame;
/// The archive transport seam and its in-memory implementation.
pub mod archive;
/// Archive retrieval, comparison and stage cleanup.
pub mod reconciler;

// --- Public API Re-exports ---
pub use stage::{KeyValueStage, MemoryStage, StageError};
pub use session_store::{SessionId, SessionStore};
pub use frame::{FrameError, MeasurementFrame};
pub use archive::{ArchiveConnector, ArchiveError, ArchiveSession, MemoryArchive};
pub use reconciler::{ArchiveReconciler, Mismatch, ReconcileError, ReconcileReport};
