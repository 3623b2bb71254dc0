//! # FTP Archive Implementation
//!
//! Provides the FTP-backed `ArchiveConnector` used in production. Each
//! `connect()` opens a control connection, logs in and switches to binary
//! transfers; artifacts are downloaded whole into memory.

use std::io::Read;

use suppaftp::types::FileType;
use suppaftp::FtpStream;

use crate::core::archive::{ArchiveConnector, ArchiveError, ArchiveSession};

/// Default FTP control port, used when the host carries none.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Credentials and address of the FTP archive.
#[derive(Clone)]
pub struct FtpConnector {
    host: String,
    username: String,
    password: String,
}

impl FtpConnector {
    /// Creates a connector. `host` may be `name` or `name:port`.
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// The `host:port` address the control connection is opened to.
    pub fn address(&self) -> String {
        if self.host.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, DEFAULT_FTP_PORT)
        }
    }
}

impl std::fmt::Debug for FtpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpConnector")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"*****")
            .finish()
    }
}

impl ArchiveConnector for FtpConnector {
    fn connect(&self) -> Result<Box<dyn ArchiveSession>, ArchiveError> {
        let address = self.address();
        log::info!("Connecting to FTP archive at {}", address);

        let mut stream =
            FtpStream::connect(address.as_str()).map_err(|e| ArchiveError::Connection(e.to_string()))?;
        stream
            .login(self.username.as_str(), self.password.as_str())
            .map_err(|e| ArchiveError::Authentication(e.to_string()))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| ArchiveError::Connection(e.to_string()))?;

        log::info!("Logged into FTP archive as '{}'", self.username);
        Ok(Box::new(FtpSession { stream }))
    }
}

struct FtpSession {
    stream: FtpStream,
}

impl ArchiveSession for FtpSession {
    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let retrieval_error = |reason: String| ArchiveError::Retrieval {
            name: name.to_string(),
            reason,
        };

        let mut cursor = self
            .stream
            .retr_as_buffer(name)
            .map_err(|e| retrieval_error(e.to_string()))?;
        let mut bytes = Vec::new();
        cursor
            .read_to_end(&mut bytes)
            .map_err(|e| retrieval_error(e.to_string()))?;
        Ok(bytes)
    }

    fn quit(mut self: Box<Self>) -> Result<(), ArchiveError> {
        self.stream
            .quit()
            .map_err(|e| ArchiveError::Disconnect(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_defaults_port() {
        assert_eq!(FtpConnector::new("archive.local", "u", "p").address(), "archive.local:21");
        assert_eq!(FtpConnector::new("10.0.0.5:2121", "u", "p").address(), "10.0.0.5:2121");
    }

    #[test]
    fn test_debug_masks_password() {
        let rendered = format!("{:?}", FtpConnector::new("h", "user", "secret"));
        assert!(rendered.contains("*****"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_unreachable_host_is_connection_error() {
        // Port 1 on localhost is closed on any sane test machine.
        let result = FtpConnector::new("127.0.0.1:1", "u", "p").connect();
        assert!(matches!(result, Err(ArchiveError::Connection(_))));
    }
}
