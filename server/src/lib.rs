//! Duplex Server - HTTP sync host for a library replica.
//!
//! Serves the remote half of the Duplex sync protocol: every protocol
//! endpoint is `POST /sync/{endpoint}`, request and response bodies are
//! JSON and may be gzipped. Requests are authenticated with a digest of a
//! shared secret when one is configured.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::AppError;
pub use state::{AppState, SharedHost};

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
