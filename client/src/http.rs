//! Compressed HTTP transport with digest authentication.
//!
//! Each request is `POST {base}/sync/{endpoint}` with the endpoint body as
//! JSON, optionally gzipped. A signed request carries fresh credentials in
//! the `X-Sync-*` headers; the session id travels in `X-Sync-Session`.
//! Failures come back as `{errorCode, errorMessage}`.

use crate::{transport::Transport, Error, HttpConfig, Result};
use async_trait::async_trait;
use chrono::Utc;
use duplex_engine::protocol::headers;
use duplex_engine::{Credentials, ErrorResponse, Request, Response};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Client;
use std::io::Write;
use tracing::debug;
use uuid::Uuid;

pub struct HttpTransport {
    client: Client,
    config: HttpConfig,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder().gzip(true).timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn url(&self, request: &Request) -> String {
        format!(
            "{}/sync/{}",
            self.config.base_url.trim_end_matches('/'),
            request.endpoint().path()
        )
    }
}

/// Gzip a request body.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, session_id: Option<&str>, request: Request) -> Result<Response> {
        let endpoint = request.endpoint();
        let body = serde_json::to_vec(&request.to_body()?)?;

        let mut builder = self
            .client
            .post(self.url(&request))
            .header(CONTENT_TYPE, "application/json");

        builder = if self.config.compress_requests {
            builder.header(CONTENT_ENCODING, "gzip").body(gzip(&body)?)
        } else {
            builder.body(body)
        };

        if let Some(secret) = &self.config.secret {
            let credentials = Credentials::sign(
                self.config.username.clone(),
                secret,
                Utc::now(),
                Uuid::new_v4().to_string(),
            );
            builder = builder
                .header(headers::USERNAME, credentials.username)
                .header(headers::CREATED, credentials.created)
                .header(headers::NONCE, credentials.nonce)
                .header(headers::DIGEST, credentials.digest);
        }
        if let Some(session_id) = session_id {
            builder = builder.header(headers::SESSION, session_id);
        }

        debug!(endpoint = %endpoint, "sending request");
        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            let body = serde_json::from_slice(&bytes)?;
            return Ok(Response::from_body(endpoint, body)?);
        }

        match serde_json::from_slice::<ErrorResponse>(&bytes) {
            Ok(error) => Err(Error::Remote {
                status: status.as_u16(),
                code: error.error_code,
                message: error.error_message,
            }),
            Err(_) => Err(Error::Protocol(format!("{endpoint} failed with {status}"))),
        }
    }
}
