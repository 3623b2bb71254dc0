//! # lib_common
//!
//! Shared library for the measurement client. The always-on `core` module
//! holds the staging and reconciliation logic; the transport-facing modules
//! are gated behind cargo features so binaries only pull in what they use.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Staging, frame decoding and archive reconciliation.
pub mod core;

/// External backends for the stage (Redis) and the archive (FTP).
#[cfg(feature = "connections")]
pub mod connections;

/// Streaming ingestion of measurement frames.
#[cfg(feature = "ingestors")]
pub mod ingestors;

/// HTTP retrieval utilities.
#[cfg(feature = "retrieve")]
pub mod retrieve;

/// Session orchestration.
#[cfg(feature = "session")]
pub mod session;

pub use crate::core::{
    ArchiveConnector, ArchiveError, ArchiveReconciler, ArchiveSession, FrameError, KeyValueStage,
    MeasurementFrame, MemoryArchive, MemoryStage, Mismatch, ReconcileError, ReconcileReport,
    SessionId, SessionStore, StageError,
};
