use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_common::ingestors::WsConfig;
use lib_common::session::SessionConfig;

const DEFAULT_CONFIG_FILE: &str = "measurement_client.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Measurement session client: streams events, then reconciles them against the archive", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "MEASUREMENT_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "MEASUREMENT_SERVER_HOST", help = "Host of the measurement server (HTTP API and stream).")]
    pub server_host: Option<String>,

    #[clap(long, env = "MEASUREMENT_SERVER_PORT", help = "Port of the measurement server.")]
    pub server_port: Option<u16>,

    #[clap(long, env = "MEASUREMENT_CYCLES", help = "Number of measurement cycles to request.")]
    pub cycle_amount: Option<u32>,

    #[clap(long, env = "MEASUREMENT_INTERVAL", help = "Interval between measurements in milliseconds.")]
    pub interval: Option<u64>,

    #[clap(long, env = "SOCKET_ROOM_NAME", help = "Room/channel name of the measurement stream.")]
    pub room_name: Option<String>,

    #[clap(long, env = "REDIS_URL", help = "Host of the Redis stage.")]
    pub redis_host: Option<String>,

    #[clap(long, env = "REDIS_PORT", help = "Port of the Redis stage.")]
    pub redis_port: Option<u16>,

    #[clap(long, env = "FTP_HOST", help = "Host (optionally host:port) of the FTP archive.")]
    pub ftp_host: Option<String>,

    #[clap(long, env = "FTP_USERNAME", help = "FTP archive user name.")]
    pub ftp_username: Option<String>,

    #[clap(long, env = "FTP_PASSWORD", hide_env_values = true, help = "FTP archive password.")]
    pub ftp_password: Option<String>,

    #[clap(long, env = "FTP_LOGIN_ATTEMPTS", help = "FTP login attempts before giving up.")]
    pub ftp_login_attempts: Option<u32>,

    #[clap(long, env = "DOWNLOAD_DIR", help = "Directory downloaded artifacts are written to.")]
    pub download_dir: Option<PathBuf>,

    #[clap(long, env = "DEBUG", help = "Enable frame tracing (any value other than 0/false).")]
    pub debug: Option<String>,

    #[clap(long, env = "MEASUREMENT_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "MEASUREMENT_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "MEASUREMENT_CONNECT_ATTEMPTS", help = "Stream connection attempts before giving up.")]
    pub connect_attempts: Option<u32>,

    #[clap(long, env = "MEASUREMENT_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds between connection attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "MEASUREMENT_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds between connection attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub session: SessionConfig,
    pub redis_host: String,
    pub redis_port: u16,
    pub ftp_host: String,
    pub ftp_username: String,
    pub ftp_password: String,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            server_host: other.server_host.or(self.server_host),
            server_port: other.server_port.or(self.server_port),
            cycle_amount: other.cycle_amount.or(self.cycle_amount),
            interval: other.interval.or(self.interval),
            room_name: other.room_name.or(self.room_name),
            redis_host: other.redis_host.or(self.redis_host),
            redis_port: other.redis_port.or(self.redis_port),
            ftp_host: other.ftp_host.or(self.ftp_host),
            ftp_username: other.ftp_username.or(self.ftp_username),
            ftp_password: other.ftp_password.or(self.ftp_password),
            ftp_login_attempts: other.ftp_login_attempts.or(self.ftp_login_attempts),
            download_dir: other.download_dir.or(self.download_dir),
            debug: other.debug.or(self.debug),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            connect_attempts: other.connect_attempts.or(self.connect_attempts),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
        }
    }

    fn defaults() -> Config {
        Config {
            server_host: Some("127.0.0.1".to_string()),
            server_port: Some(8000),
            cycle_amount: Some(5),
            interval: Some(5000),
            redis_host: Some("127.0.0.1".to_string()),
            redis_port: Some(6379),
            ftp_login_attempts: Some(1),
            download_dir: Some(PathBuf::from("downloads")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            connect_attempts: Some(1),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(30000),
            ..Default::default()
        }
    }

    pub fn debug_enabled(&self) -> bool {
        match self.debug.as_deref().map(str::trim) {
            None | Some("") | Some("0") => false,
            Some(v) => !v.eq_ignore_ascii_case("false"),
        }
    }

    /// Checks required values and builds the run settings.
    pub fn resolve(self) -> Result<Settings> {
        let debug = self.debug_enabled();

        let Some(room_name) = self.room_name.filter(|r| !r.is_empty()) else {
            bail!("SOCKET_ROOM_NAME is not set");
        };
        let ftp_host = self.ftp_host.context("FTP_HOST is not set")?;
        let ftp_username = self.ftp_username.context("FTP_USERNAME is not set")?;
        let ftp_password = self.ftp_password.context("FTP_PASSWORD is not set")?;

        let mut session = SessionConfig::new(&room_name);
        session.server_host = self.server_host.unwrap_or(session.server_host);
        session.server_port = self.server_port.unwrap_or(session.server_port);
        session.cycle_amount = self.cycle_amount.unwrap_or(session.cycle_amount);
        session.interval = self.interval.unwrap_or(session.interval);
        session.download_dir = self.download_dir.unwrap_or(session.download_dir);
        session.login_attempts = self.ftp_login_attempts.unwrap_or(1).max(1);
        session.ws = WsConfig {
            connect_attempts: self.connect_attempts.unwrap_or(1).max(1),
            reconnect_base_delay: Duration::from_millis(self.reconnect_base_delay_ms.unwrap_or(1000)),
            reconnect_max_delay: Duration::from_millis(self.reconnect_max_delay_ms.unwrap_or(30000)),
        };
        session.login_base_delay = session.ws.reconnect_base_delay;

        let log_level = if debug {
            "trace".to_string()
        } else {
            self.log_level.unwrap_or_else(|| "info".to_string())
        };

        Ok(Settings {
            session,
            redis_host: self.redis_host.unwrap_or_else(|| "127.0.0.1".to_string()),
            redis_port: self.redis_port.unwrap_or(6379),
            ftp_host,
            ftp_username,
            ftp_password,
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level,
        })
    }
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults < config file < environment (incl. `.env`) and CLI.
pub fn load_config() -> Config {
    // 1. Populate the environment from .env if present
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            log::warn!("Failed to load .env file: {}", e);
        }
    }

    // 2. Parse CLI, which also picks up environment variables
    let cli_args = Config::parse();

    // 3. Load from config file if present
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    // 4. CLI and environment win over the file
    current_config.merge(cli_args)
}
