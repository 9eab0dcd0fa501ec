//! Client configuration.

use duplex_engine::BatchLimits;
use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// Batch caps of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Caps on batches uploaded to the remote replica
    pub push: BatchLimits,
    /// Caps requested for batches downloaded from the remote replica
    pub pull: BatchLimits,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push: BatchLimits::new(500, MIB),
            pull: BatchLimits::new(5000, 10 * MIB),
        }
    }
}

impl SyncConfig {
    pub fn with_push_batch(mut self, max_count: usize, max_size: usize) -> Self {
        self.push = BatchLimits::new(max_count, max_size);
        self
    }

    pub fn with_pull_batch(mut self, max_count: usize, max_size: usize) -> Self {
        self.pull = BatchLimits::new(max_count, max_size);
        self
    }
}

/// Where and how to reach a remote replica over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// e.g. `http://localhost:3000`
    pub base_url: String,
    pub username: String,
    /// Shared secret; requests are sent unsigned without one
    pub secret: Option<String>,
    /// Gzip request bodies
    pub compress_requests: bool,
    pub timeout: Duration,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: String::new(),
            secret: None,
            compress_requests: true,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.username = username.into();
        self.secret = Some(secret.into());
        self
    }

    pub fn with_compression(mut self, compress_requests: bool) -> Self {
        self.compress_requests = compress_requests;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batches() {
        let config = SyncConfig::default();
        assert_eq!(config.push, BatchLimits::new(500, 1024 * 1024));
        assert_eq!(config.pull, BatchLimits::new(5000, 10 * 1024 * 1024));
    }

    #[test]
    fn builders() {
        let config = SyncConfig::default().with_push_batch(7, 100).with_pull_batch(9, 200);
        assert_eq!(config.push.max_count, 7);
        assert_eq!(config.pull.max_size, 200);

        let http = HttpConfig::new("http://localhost:3000")
            .with_credentials("alice", "s3cret")
            .with_compression(false);
        assert_eq!(http.secret.as_deref(), Some("s3cret"));
        assert!(!http.compress_requests);
    }
}
