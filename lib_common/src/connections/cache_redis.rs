//! # Redis Cache Implementation
//!
//! Provides a synchronous Redis-backed `KeyValueStage`. Values are plain
//! strings in database 0 with no expiry.

use redis::{Client, Commands, RedisResult};

use crate::core::stage::{KeyValueStage, StageError};

/// Database index the stage lives in.
pub const STAGE_DB_INDEX: u8 = 0;

/// A handler for Redis stage interactions.
pub struct RedisStage {
    /// The internal Redis client instance.
    pub client: Client,
}

impl RedisStage {
    /// Creates a new RedisStage from a connection string.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1:6379/0").
    pub fn new(url: &str) -> RedisResult<Self> {
        // Open the connection to the redis server
        let client = Client::open(url)?;
        Ok(Self { client })
    }

    /// Creates a RedisStage for `host:port`, pinned to the stage database.
    pub fn from_host(host: &str, port: u16) -> RedisResult<Self> {
        Self::new(&format!("redis://{}:{}/{}", host, port, STAGE_DB_INDEX))
    }

    /// Verifies the server is reachable.
    pub fn ping(&self) -> Result<(), StageError> {
        let mut conn = self.client.get_connection().map_err(backend)?;
        let _: String = redis::cmd("PING").query(&mut conn).map_err(backend)?;
        Ok(())
    }
}

impl KeyValueStage for RedisStage {
    fn set(&self, id: &str, value: &str) -> Result<(), StageError> {
        // Get a synchronous connection from the client
        let mut conn = self.client.get_connection().map_err(backend)?;
        // Perform the SET operation
        let _: () = conn.set(id, value).map_err(backend)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<String, StageError> {
        let mut conn = self.client.get_connection().map_err(backend)?;
        let value: Option<String> = conn.get(id).map_err(backend)?;
        value.ok_or_else(|| StageError::NotFound(id.to_string()))
    }

    fn delete(&self, id: &str) -> Result<(), StageError> {
        let mut conn = self.client.get_connection().map_err(backend)?;
        // DEL on a missing key returns 0, which is fine.
        let _: i64 = conn.del(id).map_err(backend)?;
        Ok(())
    }
}

fn backend(e: redis::RedisError) -> StageError {
    StageError::Backend(e.to_string())
}
