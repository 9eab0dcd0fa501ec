//! The transport seam between a sync session and a remote replica.

use crate::{Error, Result};
use async_trait::async_trait;
use duplex_engine::{CallContext, Request, Response, Store, SyncHost, Timestamp};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Carries one protocol request to the remote replica.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` within `session_id` (absent for `BeginSession`).
    ///
    /// Structured refusals of the remote side surface as [`Error::Remote`].
    async fn call(&self, session_id: Option<&str>, request: Request) -> Result<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn call(&self, session_id: Option<&str>, request: Request) -> Result<Response> {
        (**self).call(session_id, request).await
    }
}

/// Milliseconds since the epoch.
pub(crate) fn now_ms() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// In-process transport calling a [`SyncHost`] directly.
pub struct DirectTransport<S: Store> {
    host: Arc<Mutex<SyncHost<S>>>,
    owner: Option<String>,
}

impl<S: Store> DirectTransport<S> {
    pub fn new(host: Arc<Mutex<SyncHost<S>>>) -> Self {
        Self { host, owner: None }
    }

    /// Call as an authenticated user.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn host(&self) -> Arc<Mutex<SyncHost<S>>> {
        Arc::clone(&self.host)
    }
}

impl<S: Store> Clone for DirectTransport<S> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            owner: self.owner.clone(),
        }
    }
}

#[async_trait]
impl<S> Transport for DirectTransport<S>
where
    S: Store + Send + 'static,
{
    async fn call(&self, session_id: Option<&str>, request: Request) -> Result<Response> {
        let mut ctx = CallContext::new(now_ms());
        if let Some(session_id) = session_id {
            ctx = ctx.with_session(session_id);
        }
        if let Some(owner) = &self.owner {
            ctx = ctx.with_owner(owner.clone());
        }

        let mut host = self.host.lock().await;
        host.handle(&ctx, request).map_err(|e| Error::remote(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_engine::protocol::BeginSessionRequest;
    use duplex_engine::{ErrorCode, MemoryStore};
    use duplex_library::LibraryItem;

    fn host() -> Arc<Mutex<SyncHost<MemoryStore<LibraryItem>>>> {
        Arc::new(Mutex::new(SyncHost::new(MemoryStore::new("server"))))
    }

    #[tokio::test]
    async fn direct_call_reaches_the_host() {
        let transport = DirectTransport::new(host());
        let response = transport
            .call(
                None,
                Request::BeginSession(BeginSessionRequest {
                    item_types: vec!["person".into(), "book".into()],
                }),
            )
            .await
            .unwrap();

        assert!(matches!(response, Response::BeginSession(_)));
        assert_eq!(transport.host().lock().await.session_count(), 1);
    }

    #[tokio::test]
    async fn host_refusals_become_remote_errors() {
        let transport = DirectTransport::new(host());
        let error = transport
            .call(
                None,
                Request::BeginSession(BeginSessionRequest {
                    item_types: vec!["book".into()],
                }),
            )
            .await
            .unwrap_err();

        match error {
            Error::Remote { status, code, .. } => {
                assert_eq!(code, ErrorCode::SchemaMismatch);
                assert_eq!(status, 422);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
