//! Request authenticity framing.
//!
//! Every authenticated request carries a username, a creation timestamp, a
//! single-use nonce and `digest = base64(sha256(nonce ‖ created ‖ secret))`.
//! The receiver recomputes the digest from its copy of the shared secret,
//! refuses timestamps more than an hour away from its own clock and refuses
//! a nonce equal to the last one it accepted for that user.

use crate::{error::Result, Error};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Accepted distance between the request timestamp and the receiver's clock.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    /// RFC 3339 timestamp
    pub created: String,
    pub nonce: String,
    pub digest: String,
}

impl Credentials {
    /// Sign a request for `username`.
    pub fn sign(
        username: impl Into<String>,
        secret: &str,
        created: DateTime<Utc>,
        nonce: impl Into<String>,
    ) -> Self {
        let created = created.to_rfc3339_opts(SecondsFormat::Millis, true);
        let nonce = nonce.into();
        let digest = compute_digest(&nonce, &created, secret);
        Self {
            username: username.into(),
            created,
            nonce,
            digest,
        }
    }

    /// Check the digest, the timestamp window and replay of the last nonce.
    pub fn verify(&self, secret: &str, now: DateTime<Utc>, last_nonce: Option<&str>) -> Result<()> {
        let created = DateTime::parse_from_rfc3339(&self.created)
            .map_err(|_| Error::MalformedTimestamp(self.created.clone()))?
            .with_timezone(&Utc);

        let skew_ms = (now - created).num_milliseconds().abs();
        if skew_ms > MAX_CLOCK_SKEW_SECS * 1000 {
            return Err(Error::StaleTimestamp(self.created.clone()));
        }

        let expected = compute_digest(&self.nonce, &self.created, secret);
        if !constant_time_eq(expected.as_bytes(), self.digest.as_bytes()) {
            return Err(Error::BadCredential(self.username.clone()));
        }

        if last_nonce == Some(self.nonce.as_str()) {
            return Err(Error::ReplayedNonce(self.username.clone()));
        }

        Ok(())
    }
}

/// `base64(sha256(nonce ‖ created ‖ secret))`
pub fn compute_digest(nonce: &str, created: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.update(created.as_bytes());
    hasher.update(secret.as_bytes());
    BASE64.encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
