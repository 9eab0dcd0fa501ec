//! Configuration management for the server.

use duplex_engine::{BatchLimits, HostConfig};
use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Identifier of the server replica
    pub replica_id: String,
    /// User allowed to sync
    pub username: Option<String>,
    /// Shared secret for request digests; requests are anonymous without one
    pub secret: Option<String>,
    /// JSON snapshot written after every applied push
    pub snapshot_path: Option<PathBuf>,
    pub max_sessions: usize,
    pub session_ttl_secs: u64,
    pub max_batch_count: usize,
    pub max_batch_size: usize,
}

impl Config {
    /// Defaults for a replica, without credentials or persistence.
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            replica_id: replica_id.into(),
            username: None,
            secret: None,
            snapshot_path: None,
            max_sessions: 16,
            session_ttl_secs: 30 * 60,
            max_batch_count: 500,
            max_batch_size: 1024 * 1024,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.secret = Some(secret.into());
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let replica_id = env::var("REPLICA_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let defaults = Self::new(replica_id);

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        Ok(Self {
            host,
            port,
            username: env::var("SYNC_USERNAME").ok(),
            secret: env::var("SYNC_SECRET").ok().filter(|s| !s.is_empty()),
            snapshot_path: env::var("SNAPSHOT_PATH").ok().map(PathBuf::from),
            max_sessions: number("MAX_SESSIONS", defaults.max_sessions)?,
            session_ttl_secs: number("SESSION_TTL_SECS", defaults.session_ttl_secs)?,
            max_batch_count: number("MAX_BATCH_COUNT", defaults.max_batch_count)?,
            max_batch_size: number("MAX_BATCH_SIZE", defaults.max_batch_size)?,
            ..defaults
        })
    }

    /// Session and batch limits of the sync host.
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            max_sessions: self.max_sessions,
            session_ttl_ms: self.session_ttl_secs.saturating_mul(1000),
            batch_limits: BatchLimits::new(self.max_batch_count.max(1), self.max_batch_size.max(1)),
        }
    }
}

fn number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {name} value: {value}")]
    InvalidNumber { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_config_from_defaults() {
        let config = Config::new("server");
        let host = config.host_config();
        assert_eq!(host.max_sessions, 16);
        assert_eq!(host.session_ttl_ms, 1_800_000);
        assert_eq!(host.batch_limits, BatchLimits::new(500, 1024 * 1024));
    }

    #[test]
    fn credentials_builder() {
        let config = Config::new("server").with_credentials("alice", "s3cret");
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.secret.as_deref(), Some("s3cret"));
    }
}
