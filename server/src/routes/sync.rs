//! Sync protocol routes: one `POST /sync/{endpoint}` per protocol endpoint.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use duplex_engine::{protocol::headers, CallContext, Endpoint, Error, Request};
use serde_json::Value;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/sync/{endpoint}", post(sync_handler))
}

fn parse_body(body: &Bytes) -> Result<Value> {
    if body.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body)
        .map_err(|e| Error::InvalidRequest(format!("malformed JSON body: {e}")).into())
}

/// POST /sync/{endpoint} - Run one protocol step against the host.
async fn sync_handler(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    auth: AuthUser,
    request_headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let endpoint = Endpoint::from_path(&endpoint)?;
    let request = Request::from_body(endpoint, parse_body(&body)?)?;

    let mut ctx = CallContext::new(u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0));
    if let Some(session_id) = request_headers.get(headers::SESSION).and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_session(session_id);
    }
    if let Some(username) = auth.username {
        ctx = ctx.with_owner(username);
    }

    let response = state.handle(&ctx, request).await?;
    tracing::debug!(endpoint = %endpoint, session_id = ?ctx.session_id, "Handled sync request");
    if endpoint == Endpoint::ApplyChanges {
        tracing::info!(session_id = ?ctx.session_id, "Applied pushed changes");
    }

    Ok(Json(response.to_body()?))
}
