//! # Measurement Client
//!
//! Runs one measurement session: health check, clock sync, stream the
//! measurement events into the Redis stage, then reconcile them against the
//! FTP archive. Any fatal condition ends the process with a failure status.

use std::sync::Arc;

use anyhow::{Context, Result};

mod measure_logic;
use measure_logic::{config, logger};

use lib_common::connections::{FtpConnector, RedisStage};
use lib_common::session::SessionClient;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = config::load_config()
        .resolve()
        .context("Invalid configuration")?;
    logger::setup_logging(&settings.log_dir, &settings.log_level).context("Failed to setup logging")?;

    // --- Backends ---
    let stage = RedisStage::from_host(&settings.redis_host, settings.redis_port)
        .context("Invalid Redis address")?;
    stage
        .ping()
        .with_context(|| format!("Redis at {}:{} is unreachable", settings.redis_host, settings.redis_port))?;
    let archive = FtpConnector::new(&settings.ftp_host, &settings.ftp_username, &settings.ftp_password);

    // --- Session ---
    let mut client = SessionClient::new(settings.session, Arc::new(stage), Arc::new(archive))?;
    let outcome = client.run().await.map_err(|e| {
        log::error!("Session {} aborted: {}", client.session_id(), e);
        e
    })?;

    log::info!(
        "Session {} complete: {} event(s) streamed, {} compared, {} mismatch(es), {} missing.",
        outcome.session_id,
        outcome.stream.accepted,
        outcome.report.compared,
        outcome.report.mismatches.len(),
        outcome.report.missing.len()
    );
    Ok(())
}
