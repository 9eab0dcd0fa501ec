//! Server half of the sync protocol.
//!
//! A [`SyncHost`] owns a store and a table of open sessions keyed by
//! session id. Each session keeps its own staging store, the knowledge the
//! peer reported and the list of changes computed for it, so any number of
//! peers can sync against the same host as long as their requests are
//! serialized through it. Pull and push halves reuse the same status
//! derivation and commit code as the client.

use crate::{
    commit_changes, detect_duplicates, error::Result, load_conflicts, protocol::*,
    stage_incoming, take_batch, Error, ItemInfo, Knowledge, SessionId, StagingStore, Store,
    SyncItem, Timestamp,
};
use std::collections::HashMap;

/// Limits of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Open sessions admitted at once
    pub max_sessions: usize,
    /// Idle time after which a session is dropped, in milliseconds
    pub session_ttl_ms: u64,
    /// Batch hints returned by `BeginSession` and caps on served batches
    pub batch_limits: BatchLimits,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            session_ttl_ms: 30 * 60 * 1000,
            batch_limits: BatchLimits::new(500, 1024 * 1024),
        }
    }
}

/// Who is calling and when.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    pub session_id: Option<SessionId>,
    /// Authenticated user, if any
    pub owner: Option<String>,
    /// Milliseconds since the epoch
    pub now: Timestamp,
}

impl CallContext {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

struct HostSession<P> {
    owner: Option<String>,
    staging: StagingStore<P>,
    peer_knowledge: Option<Knowledge>,
    changes: Option<Vec<ItemInfo>>,
    expected_changes: usize,
    /// Change numbers `0..received` have arrived
    received: usize,
    expires_at: Timestamp,
}

type SessionIdGenerator = Box<dyn FnMut() -> SessionId + Send>;

/// Serves sync sessions against one store.
pub struct SyncHost<S: Store> {
    store: S,
    config: HostConfig,
    sessions: HashMap<SessionId, HostSession<S::Payload>>,
    next_id: SessionIdGenerator,
}

impl<S: Store> SyncHost<S> {
    /// Create a host with default limits.
    pub fn new(store: S) -> Self {
        let mut counter = 0u64;
        Self {
            store,
            config: HostConfig::default(),
            sessions: HashMap::new(),
            next_id: Box::new(move || {
                counter += 1;
                format!("session-{counter}")
            }),
        }
    }

    /// Builder-style method to set limits.
    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder-style method to set how session ids are issued.
    pub fn with_session_ids(mut self, generator: impl FnMut() -> SessionId + Send + 'static) -> Self {
        self.next_id = Box::new(generator);
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Sessions currently open, expired ones included until evicted.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every session idle past its deadline.
    pub fn evict_expired(&mut self, now: Timestamp) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        before - self.sessions.len()
    }

    /// Dispatch a request to its handler.
    pub fn handle(&mut self, ctx: &CallContext, request: Request) -> Result<Response> {
        let owner = ctx.owner.as_deref();
        let now = ctx.now;
        let session = || {
            ctx.session_id
                .as_deref()
                .ok_or_else(|| Error::InvalidRequest("missing session id".into()))
        };

        Ok(match request {
            Request::BeginSession(body) => {
                Response::BeginSession(self.begin_session(owner, now, body)?)
            }
            Request::EndSession(_) => Response::EndSession(self.end_session(session()?, owner)?),
            Request::GetChanges(body) => {
                Response::GetChanges(self.get_changes(session()?, owner, now, body)?)
            }
            Request::GetItemData(body) => {
                Response::GetItemData(self.get_item_data(session()?, owner, now, body)?)
            }
            Request::GetItemDataBatch(body) => Response::GetItemDataBatch(
                self.get_item_data_batch(session()?, owner, now, body)?,
            ),
            Request::PutChanges(body) => {
                Response::PutChanges(self.put_changes(session()?, owner, now, body)?)
            }
            Request::PutItemDataBatch(body) => Response::PutItemDataBatch(
                self.put_item_data_batch(session()?, owner, now, body)?,
            ),
            Request::ApplyChanges(body) => {
                Response::ApplyChanges(self.apply_changes(session()?, owner, now, body)?)
            }
        })
    }

    /// Validate the peer's item types and open a session.
    pub fn begin_session(
        &mut self,
        owner: Option<&str>,
        now: Timestamp,
        request: BeginSessionRequest,
    ) -> Result<BeginSessionResponse> {
        let expected = self.store.item_types();
        if request.item_types != expected {
            return Err(Error::ItemTypeMismatch {
                expected,
                actual: request.item_types,
            });
        }

        self.evict_expired(now);
        if self.sessions.len() >= self.config.max_sessions {
            return Err(Error::SessionLimit(self.sessions.len()));
        }

        let session_id = (self.next_id)();
        self.sessions.insert(
            session_id.clone(),
            HostSession {
                owner: owner.map(str::to_string),
                staging: StagingStore::new(),
                peer_knowledge: None,
                changes: None,
                expected_changes: 0,
                received: 0,
                expires_at: now.saturating_add(self.config.session_ttl_ms),
            },
        );

        Ok(BeginSessionResponse {
            session_id,
            max_batch_count: self.config.batch_limits.max_count,
            max_batch_size: self.config.batch_limits.max_size,
        })
    }

    /// Close a session and drop its staging store.
    pub fn end_session(&mut self, session_id: &str, owner: Option<&str>) -> Result<EndSessionResponse> {
        match self.sessions.get(session_id) {
            None => Err(Error::SessionNotFound(session_id.to_string())),
            Some(session) if session.owner.as_deref() != owner => {
                Err(Error::SessionMismatch(session_id.to_string()))
            }
            Some(_) => {
                self.sessions.remove(session_id);
                Ok(EndSessionResponse {})
            }
        }
    }

    fn session_mut<'a>(
        sessions: &'a mut HashMap<SessionId, HostSession<S::Payload>>,
        config: &HostConfig,
        session_id: &str,
        owner: Option<&str>,
        now: Timestamp,
    ) -> Result<&'a mut HostSession<S::Payload>> {
        let expired = match sessions.get(session_id) {
            None => return Err(Error::SessionNotFound(session_id.to_string())),
            Some(session) => session.expires_at <= now,
        };
        if expired {
            sessions.remove(session_id);
            return Err(Error::SessionNotFound(session_id.to_string()));
        }

        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if session.owner.as_deref() != owner {
            return Err(Error::SessionMismatch(session_id.to_string()));
        }
        session.expires_at = now.saturating_add(config.session_ttl_ms);
        Ok(session)
    }

    /// Record the peer's knowledge and compute what it is missing.
    pub fn get_changes(
        &mut self,
        session_id: &str,
        owner: Option<&str>,
        now: Timestamp,
        request: GetChangesRequest,
    ) -> Result<GetChangesResponse> {
        let changes = self.store.locate_changed_items(&request.knowledge)?;
        let knowledge = self.store.generate_local_knowledge()?;
        let session = Self::session_mut(&mut self.sessions, &self.config, session_id, owner, now)?;

        let total_changes = changes.len();
        session.peer_knowledge = Some(request.knowledge);
        session.changes = Some(changes);

        Ok(GetChangesResponse {
            knowledge,
            total_changes,
        })
    }

    /// Serve the current version of one item.
    pub fn get_item_data(
        &mut self,
        session_id: &str,
        owner: Option<&str>,
        now: Timestamp,
        request: GetItemDataRequest,
    ) -> Result<GetItemDataResponse> {
        Self::session_mut(&mut self.sessions, &self.config, session_id, owner, now)?;

        let info = self
            .store
            .locate_current_item_info(&request.item)?
            .ok_or_else(|| Error::ItemNotFound(request.item.to_string()))?;
        let item = self.store.build_item_data(&info)?.to_wire()?;
        Ok(GetItemDataResponse { item })
    }

    /// Serve the next batch of changes computed by `GetChanges`.
    pub fn get_item_data_batch(
        &mut self,
        session_id: &str,
        owner: Option<&str>,
        now: Timestamp,
        request: GetItemDataBatchRequest,
    ) -> Result<GetItemDataBatchResponse> {
        let session = Self::session_mut(&mut self.sessions, &self.config, session_id, owner, now)?;
        let changes = session
            .changes
            .as_deref()
            .ok_or_else(|| Error::InvalidRequest("getChanges must precede getItemDataBatch".into()))?;
        if request.start_item > changes.len() {
            return Err(Error::InvalidRequest(format!(
                "start item {} beyond {} changes",
                request.start_item,
                changes.len()
            )));
        }

        let limits = self.config.batch_limits.min(BatchLimits::new(
            request.max_batch_count.max(1),
            request.max_batch_size.max(1),
        ));
        let store = &self.store;
        let entries = changes[request.start_item..]
            .iter()
            .enumerate()
            .map(|(offset, info)| -> Result<ChangeEntry> {
                Ok(ChangeEntry {
                    change_number: request.start_item + offset,
                    item: store.build_item_data(info)?.to_wire()?,
                })
            });
        let batch = take_batch(entries, &limits, |entry| entry.item.encoded_len())?;

        Ok(GetItemDataBatchResponse { batch })
    }

    /// Start receiving the peer's changes.
    pub fn put_changes(
        &mut self,
        session_id: &str,
        owner: Option<&str>,
        now: Timestamp,
        request: PutChangesRequest,
    ) -> Result<PutChangesResponse> {
        let session = Self::session_mut(&mut self.sessions, &self.config, session_id, owner, now)?;
        session.staging.begin(request.knowledge);
        session.expected_changes = request.change_count;
        session.received = 0;
        Ok(PutChangesResponse {})
    }

    /// Stage a batch of the peer's changes.
    pub fn put_item_data_batch(
        &mut self,
        session_id: &str,
        owner: Option<&str>,
        now: Timestamp,
        request: PutItemDataBatchRequest,
    ) -> Result<PutItemDataBatchResponse> {
        let session = Self::session_mut(&mut self.sessions, &self.config, session_id, owner, now)?;
        for entry in request.batch {
            // Already seen changes are staged again; anything past the next one is a gap.
            if entry.change_number > session.received {
                return Err(Error::InvalidRequest(format!(
                    "change {} arrived before change {}",
                    entry.change_number, session.received
                )));
            }
            if entry.change_number >= session.expected_changes {
                return Err(Error::InvalidRequest(format!(
                    "change {} is beyond the {} announced",
                    entry.change_number, session.expected_changes
                )));
            }
            let item = SyncItem::from_wire(entry.item)?;
            stage_incoming(&self.store, &mut session.staging, item)?;
            if entry.change_number == session.received {
                session.received += 1;
            }
        }
        Ok(PutItemDataBatchResponse {
            received: session.received,
        })
    }

    /// Commit the staged changes of the peer.
    pub fn apply_changes(
        &mut self,
        session_id: &str,
        owner: Option<&str>,
        now: Timestamp,
        request: ApplyChangesRequest,
    ) -> Result<ApplyChangesResponse> {
        let session = Self::session_mut(&mut self.sessions, &self.config, session_id, owner, now)?;
        let received = session.received;
        if received != request.change_count || received != session.expected_changes {
            return Err(Error::ChangeCountMismatch {
                expected: request.change_count,
                actual: received,
            });
        }

        detect_duplicates(&mut self.store, &mut session.staging)?;
        let conflicts = load_conflicts(&self.store, &mut session.staging)?;
        if !conflicts.is_empty() {
            return Err(Error::UnresolvedConflicts(conflicts.len()));
        }

        let summary = commit_changes(&mut self.store, &mut session.staging)?;
        session.changes = None;
        Ok(ApplyChangesResponse { summary })
    }

    /// Knowledge the peer of a session reported, if any.
    pub fn peer_knowledge(&self, session_id: &str) -> Option<&Knowledge> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.peer_knowledge.as_ref())
    }
}
