//! # Data Retrieval Module
//!
//! This module provides a centralized location for generic data retrieval
//! clients, focused on HTTP-based request/response interactions such as the
//! session's liveness probe and clock synchronization.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: An HTTP `ApiClient` built on `reqwest` with a status-only
//!   probe and a typed JSON GET.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// HTTP API client for the measurement server.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
