//! # Session Module
//!
//! Ties the core pipeline to its transports for a single run of the client.

/// Orchestration of liveness, clock sync, streaming and reconciliation.
pub mod session_client;

pub use session_client::{
    ClockSync, SessionClient, SessionConfig, SessionError, SessionOutcome,
};
