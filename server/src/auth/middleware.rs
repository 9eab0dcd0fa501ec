//! Authentication extractor.
//!
//! Verifies the `X-Sync-*` digest headers of a request against the shared
//! secret and the last nonce accepted from the same user. Without a
//! configured secret every request is accepted anonymously.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use duplex_engine::{protocol::headers, Credentials, Error};

use crate::error::AppError;
use crate::AppState;

/// Authenticated user extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// `None` for anonymous access
    pub username: Option<String>,
}

/// Last nonce accepted per user.
#[derive(Debug, Default)]
pub struct NonceTracker {
    last: DashMap<String, String>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify credentials and remember their nonce if they pass.
    pub fn verify(&self, credentials: &Credentials, secret: &str) -> Result<(), Error> {
        let now = Utc::now();
        match self.last.entry(credentials.username.clone()) {
            Entry::Occupied(mut last) => {
                credentials.verify(secret, now, Some(last.get().as_str()))?;
                last.insert(credentials.nonce.clone());
            }
            Entry::Vacant(slot) => {
                credentials.verify(secret, now, None)?;
                slot.insert(credentials.nonce.clone());
            }
        }
        Ok(())
    }
}

fn header(map: &HeaderMap, name: &str) -> Result<String, Error> {
    map.get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| Error::BadCredential(format!("missing {name} header")))
}

fn credentials(map: &HeaderMap) -> Result<Credentials, Error> {
    Ok(Credentials {
        username: header(map, headers::USERNAME)?,
        created: header(map, headers::CREATED)?,
        nonce: header(map, headers::NONCE)?,
        digest: header(map, headers::DIGEST)?,
    })
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.secret.as_deref() else {
            return Ok(AuthUser { username: None });
        };

        let credentials = credentials(&parts.headers)?;
        if let Some(expected) = state.config.username.as_deref() {
            if credentials.username != expected {
                return Err(Error::BadCredential(credentials.username).into());
            }
        }

        state.nonces.verify(&credentials, secret)?;
        Ok(AuthUser {
            username: Some(credentials.username),
        })
    }
}
