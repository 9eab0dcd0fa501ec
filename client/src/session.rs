//! The client sync session.
//!
//! A [`SyncSession`] owns the local store and its staging store and drives
//! one remote replica through the protocol:
//!
//! ```text
//! commit(pre) -> open -> pull -> detect -> gate -> commit -> push -> apply -> close
//! ```
//!
//! When the gate finds conflicts the remote session is closed and the
//! conflicts are returned. They stay staged until resolved through the
//! `resolve_conflict_*` methods and are applied by the next [`SyncSession::sync`].

use crate::progress::{percent_between, Stage};
use crate::transport::Transport;
use crate::{Error, ProgressReporter, Result, SyncConfig};
use duplex_engine::protocol::*;
use duplex_engine::{
    commit_changes, detect_duplicates, fill_placeholder, load_conflicts, resolve_local_wins,
    resolve_merge, resolve_remote_wins, stage_incoming, stage_referenced_placeholders,
    take_batch, BatchLimits, CommitSummary, DuplicateSummary, ErrorCode, ItemIdentity, ItemInfo,
    ItemRef, Knowledge, SessionId, StagingStore, Store, SyncConflict, SyncItem,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// What the pull half brought in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Changes the remote replica reported and sent
    pub received: usize,
    /// Referenced items fetched one by one
    pub fetched: usize,
    pub duplicates: DuplicateSummary,
    pub committed: CommitSummary,
}

/// A completed sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub session_id: SessionId,
    /// Changes staged by an earlier sync and committed before this one
    pub pre_committed: CommitSummary,
    pub pull: PullSummary,
    /// Local changes uploaded
    pub pushed: usize,
    /// What the remote replica applied
    pub applied: CommitSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome<P> {
    Completed(SyncReport),
    /// Nothing was committed; resolve these and sync again
    Conflicts(Vec<SyncConflict<P>>),
}

impl<P> SyncOutcome<P> {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    pub fn conflicts(&self) -> &[SyncConflict<P>] {
        match self {
            SyncOutcome::Completed(_) => &[],
            SyncOutcome::Conflicts(conflicts) => conflicts,
        }
    }
}

struct Local<S: Store> {
    store: S,
    staging: StagingStore<S::Payload>,
}

/// Synchronizes a local store with one remote replica.
pub struct SyncSession<S: Store, T: Transport> {
    local: Mutex<Local<S>>,
    transport: T,
    config: SyncConfig,
    closed: AtomicBool,
}

macro_rules! expect_response {
    ($response:expr, $variant:ident) => {
        match $response {
            Response::$variant(body) => body,
            other => {
                return Err(Error::Protocol(format!(
                    "expected {} response, got {}",
                    Endpoint::$variant,
                    other.endpoint()
                )))
            }
        }
    };
}

impl<S, T> SyncSession<S, T>
where
    S: Store + Send,
    T: Transport,
{
    pub fn new(store: S, transport: T) -> Self {
        Self {
            local: Mutex::new(Local {
                store,
                staging: StagingStore::new(),
            }),
            transport,
            config: SyncConfig::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Access the local store. Waits while a sync is running.
    pub async fn store(&self) -> MappedMutexGuard<'_, S> {
        MutexGuard::map(self.local.lock().await, |local| &mut local.store)
    }

    /// Number of staged conflicts still awaiting a resolution.
    pub async fn unresolved_conflicts(&self) -> usize {
        self.local.lock().await.staging.unresolved_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the session. Staged rows are discarded and later sync or
    /// resolve calls fail with [`Error::SessionClosed`].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.local.lock().await.staging.clear();
    }

    pub fn into_store(self) -> S {
        self.local.into_inner().store
    }

    fn begin_exclusive(&self) -> Result<MutexGuard<'_, Local<S>>> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.local.try_lock().map_err(|_| Error::SyncInProgress)
    }

    /// Run one full sync with the remote replica.
    pub async fn sync(&self, progress: &ProgressReporter) -> Result<SyncOutcome<S::Payload>> {
        let mut local = self.begin_exclusive()?;
        let local = &mut *local;

        progress.report(Stage::Committing, 0, "committing staged changes")?;
        let pre_committed = if local.staging.unresolved_count() == 0 {
            match commit_changes(&mut local.store, &mut local.staging) {
                Ok(summary) => summary,
                Err(e) => {
                    local.staging.clear();
                    return Err(e.into());
                }
            }
        } else {
            CommitSummary::default()
        };

        progress.report(Stage::Opening, 5, "opening session")?;
        let begin = self
            .transport
            .call(
                None,
                Request::BeginSession(BeginSessionRequest {
                    item_types: local.store.item_types(),
                }),
            )
            .await?;
        let begin = expect_response!(begin, BeginSession);
        let session_id = begin.session_id;
        let hint = BatchLimits::new(begin.max_batch_count.max(1), begin.max_batch_size.max(1));
        info!(session_id = %session_id, "sync session opened");

        let result = self
            .run(local, &session_id, hint, progress)
            .await
            .map(|outcome| match outcome {
                SyncOutcome::Completed(mut report) => {
                    report.pre_committed = pre_committed;
                    SyncOutcome::Completed(report)
                }
                conflicts => conflicts,
            });

        let ended = self
            .transport
            .call(Some(&session_id), Request::EndSession(EndSessionRequest {}))
            .await;
        if let Err(e) = ended {
            warn!(session_id = %session_id, error = %e, "failed to end session");
        }

        // A failed pull leaves partial rows that must never be committed
        if result.is_err() {
            local.staging.clear();
        }

        match &result {
            Ok(SyncOutcome::Completed(report)) => {
                progress.notify(Stage::Closing, 100, "sync complete");
                info!(
                    session_id = %session_id,
                    received = report.pull.received,
                    pushed = report.pushed,
                    "sync completed"
                );
            }
            Ok(SyncOutcome::Conflicts(conflicts)) => {
                warn!(session_id = %session_id, count = conflicts.len(), "sync halted on conflicts");
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "sync failed"),
        }
        result
    }

    async fn run(
        &self,
        local: &mut Local<S>,
        session_id: &str,
        hint: BatchLimits,
        progress: &ProgressReporter,
    ) -> Result<SyncOutcome<S::Payload>> {
        let (remote_knowledge, mut pull) = self.pull(local, session_id, progress).await?;

        progress.report(Stage::Detecting, 55, "detecting duplicates and conflicts")?;
        pull.duplicates = detect_duplicates(&mut local.store, &mut local.staging)?;
        let conflicts = load_conflicts(&local.store, &mut local.staging)?;
        if !conflicts.is_empty() {
            return Ok(SyncOutcome::Conflicts(conflicts));
        }

        progress.report(Stage::Committing, 60, "committing pulled changes")?;
        pull.committed = commit_changes(&mut local.store, &mut local.staging)?;
        debug!(session_id, committed = pull.committed.total(), "pull committed");

        let (pushed, applied) = self
            .push(local, session_id, &remote_knowledge, self.config.push.min(hint), progress)
            .await?;

        Ok(SyncOutcome::Completed(SyncReport {
            session_id: session_id.to_string(),
            pre_committed: CommitSummary::default(),
            pull,
            pushed,
            applied,
        }))
    }

    /// Stage everything the remote replica has that we have not seen.
    async fn pull(
        &self,
        local: &mut Local<S>,
        session_id: &str,
        progress: &ProgressReporter,
    ) -> Result<(Knowledge, PullSummary)> {
        progress.report(Stage::Pulling, 10, "exchanging knowledge")?;
        let knowledge = local.store.generate_local_knowledge()?;
        let changes = self
            .transport
            .call(
                Some(session_id),
                Request::GetChanges(GetChangesRequest { knowledge }),
            )
            .await?;
        let changes = expect_response!(changes, GetChanges);
        let total = changes.total_changes;
        local.staging.begin(changes.knowledge.clone());

        let mut summary = PullSummary::default();
        while summary.received < total {
            progress.report(
                Stage::Pulling,
                percent_between(10, 45, summary.received, total),
                format!("received {} of {} changes", summary.received, total),
            )?;

            let batch = self
                .transport
                .call(
                    Some(session_id),
                    Request::GetItemDataBatch(GetItemDataBatchRequest {
                        start_item: summary.received,
                        max_batch_count: self.config.pull.max_count,
                        max_batch_size: self.config.pull.max_size,
                    }),
                )
                .await?;
            let batch = expect_response!(batch, GetItemDataBatch).batch;
            if batch.is_empty() {
                return Err(Error::Protocol(format!(
                    "empty batch after {} of {} changes",
                    summary.received, total
                )));
            }

            let count = batch.len();
            for entry in batch {
                if entry.change_number != summary.received {
                    return Err(Error::Protocol(format!(
                        "expected change {}, got {}",
                        summary.received, entry.change_number
                    )));
                }
                let item = SyncItem::from_wire(entry.item)?;
                let identity = item.identity.clone();
                stage_incoming(&local.store, &mut local.staging, item)?;
                stage_referenced_placeholders(&local.store, &mut local.staging, &identity)?;
                summary.received += 1;
            }
            debug!(session_id, count, received = summary.received, "pulled batch");
        }

        summary.fetched = self.fill_placeholders(local, session_id, progress).await?;
        Ok((changes.knowledge, summary))
    }

    /// Fetch referenced items that are tombstones locally, following any
    /// references the fetched items bring along.
    async fn fill_placeholders(
        &self,
        local: &mut Local<S>,
        session_id: &str,
        progress: &ProgressReporter,
    ) -> Result<usize> {
        let mut fetched = 0;
        loop {
            let pending = local.staging.placeholders_to_fill();
            if pending.is_empty() {
                return Ok(fetched);
            }

            for identity in pending {
                progress.report(Stage::Pulling, 50, format!("fetching {identity}"))?;
                let remote = self.fetch_item(session_id, &identity).await?;
                fill_placeholder(&local.store, &mut local.staging, &identity, remote)?;
                fetched += 1;
            }
        }
    }

    async fn fetch_item(
        &self,
        session_id: &str,
        identity: &ItemIdentity,
    ) -> Result<Option<SyncItem<S::Payload>>> {
        let response = self
            .transport
            .call(
                Some(session_id),
                Request::GetItemData(GetItemDataRequest {
                    item: identity.clone(),
                }),
            )
            .await;

        match response {
            Ok(response) => {
                let body = expect_response!(response, GetItemData);
                Ok(Some(SyncItem::from_wire(body.item)?))
            }
            Err(e) if e.remote_code() == Some(ErrorCode::ItemNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Upload local changes the remote replica has not seen and ask it to
    /// apply them.
    async fn push(
        &self,
        local: &mut Local<S>,
        session_id: &str,
        remote_knowledge: &Knowledge,
        limits: BatchLimits,
        progress: &ProgressReporter,
    ) -> Result<(usize, CommitSummary)> {
        progress.report(Stage::Pushing, 65, "computing local changes")?;
        let changes: Vec<ItemInfo> = local.store.locate_changed_items(remote_knowledge)?;
        let total = changes.len();
        let knowledge = local.store.generate_local_knowledge()?;

        let put = self
            .transport
            .call(
                Some(session_id),
                Request::PutChanges(PutChangesRequest {
                    knowledge,
                    change_count: total,
                }),
            )
            .await?;
        expect_response!(put, PutChanges);

        let mut sent = 0;
        while sent < total {
            progress.report(
                Stage::Pushing,
                percent_between(65, 90, sent, total),
                format!("sent {sent} of {total} changes"),
            )?;

            let store = &local.store;
            let entries = changes[sent..]
                .iter()
                .enumerate()
                .map(|(offset, info)| -> duplex_engine::error::Result<ChangeEntry> {
                    Ok(ChangeEntry {
                        change_number: sent + offset,
                        item: store.build_item_data(info)?.to_wire()?,
                    })
                });
            let batch = take_batch(entries, &limits, |entry| entry.item.encoded_len())?;
            let count = batch.len();

            let response = self
                .transport
                .call(
                    Some(session_id),
                    Request::PutItemDataBatch(PutItemDataBatchRequest { batch }),
                )
                .await?;
            expect_response!(response, PutItemDataBatch);
            sent += count;
            debug!(session_id, count, sent, "pushed batch");
        }

        progress.report(Stage::Applying, 90, "applying changes remotely")?;
        let applied = self
            .transport
            .call(
                Some(session_id),
                Request::ApplyChanges(ApplyChangesRequest {
                    change_count: total,
                }),
            )
            .await?;
        let applied = expect_response!(applied, ApplyChanges).summary;
        Ok((total, applied))
    }

    /// Keep the remote version of a conflicting item.
    pub async fn resolve_conflict_remote_wins(&self, identity: &ItemIdentity) -> Result<()> {
        let mut local = self.begin_exclusive()?;
        let local = &mut *local;
        resolve_remote_wins(&mut local.store, &mut local.staging, identity)?;
        Ok(())
    }

    /// Keep the local version of a conflicting item.
    pub async fn resolve_conflict_local_wins(&self, identity: &ItemIdentity) -> Result<()> {
        let mut local = self.begin_exclusive()?;
        let local = &mut *local;
        resolve_local_wins(&mut local.store, &mut local.staging, identity)?;
        Ok(())
    }

    /// Replace a conflicting item with a caller-built merge.
    pub async fn resolve_conflict_merge(
        &self,
        identity: &ItemIdentity,
        payload: S::Payload,
        item_refs: Vec<ItemRef>,
    ) -> Result<()> {
        let mut local = self.begin_exclusive()?;
        let local = &mut *local;
        resolve_merge(&mut local.store, &mut local.staging, identity, payload, item_refs)?;
        Ok(())
    }
}
