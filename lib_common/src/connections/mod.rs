//! # Connections Module
//!
//! This module handles connections to the external services the measurement
//! session depends on: the key-value stage and the file archive.

/// Module for the Redis-backed key-value stage.
pub mod cache_redis;

/// Module for the FTP-backed archive connector.
pub mod archive_ftp;

pub use archive_ftp::FtpConnector;
pub use cache_redis::RedisStage;
