//! Store contract and the commit of staged changes into a store.
//!
//! The store owns durable items; the engine drives it through [`Store`].
//! [`commit_changes`] applies a staging store inside one store transaction:
//! either every staged row applies and local knowledge advances, or nothing does.

use crate::{
    error::Result, DuplicateStatus, Error, ItemIdentity, ItemInfo, ItemType, Knowledge, Payload,
    Stamp, StagingStore, SyncItem, SyncStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The durable-store capability the engine consumes.
pub trait Store {
    /// Codec of the items this store holds.
    type Payload: Payload;

    /// Identifier of the local replica.
    fn replica_id(&self) -> &str;

    /// Item types in store-declared order.
    fn item_types(&self) -> Vec<ItemType> {
        Self::Payload::item_type_names()
    }

    /// Current knowledge of the local replica, including its own tick count.
    fn generate_local_knowledge(&self) -> Result<Knowledge>;

    /// Items and tombstones whose modification is not contained in `remote_knowledge`,
    /// in a deterministic order.
    fn locate_changed_items(&self, remote_knowledge: &Knowledge) -> Result<Vec<ItemInfo>>;

    /// Current local state of an item, or `None` if it was never seen.
    fn locate_current_item_info(&self, identity: &ItemIdentity) -> Result<Option<ItemInfo>>;

    /// Build the full item (payload and references) for a located item.
    fn build_item_data(&self, info: &ItemInfo) -> Result<SyncItem<Self::Payload>>;

    /// Start a transaction.
    fn begin_changes(&mut self) -> Result<()>;

    /// Insert or replace a live item, keeping its modification stamp.
    fn save_item_data(&mut self, item: &SyncItem<Self::Payload>) -> Result<()>;

    /// Replace an item (or nothing) with a tombstone carrying `stamp`.
    fn delete_item(
        &mut self,
        identity: &ItemIdentity,
        stamp: &Stamp,
        replaced_by: Option<&ItemIdentity>,
    ) -> Result<()>;

    /// Record that everything `remote_knowledge` covers has now been observed.
    fn update_local_knowledge(&mut self, remote_knowledge: &Knowledge) -> Result<()>;

    /// Commit the transaction.
    fn accept_changes(&mut self) -> Result<()>;

    /// Roll the transaction back.
    fn reject_changes(&mut self) -> Result<()>;

    /// Domain equality between a local and a remote item of the same type.
    fn duplicate_status(
        &self,
        local: &SyncItem<Self::Payload>,
        remote: &SyncItem<Self::Payload>,
    ) -> DuplicateStatus {
        match (&local.payload, &remote.payload) {
            (Some(l), Some(r)) => l.duplicate_status(&local.item_refs, r, &remote.item_refs),
            _ => DuplicateStatus::None,
        }
    }

    /// Advance the local tick count by one and return the new stamp.
    fn increment_local_tick_count(&mut self) -> Result<Stamp>;
}

/// Counts of what a commit applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Speculatively pulled items that a referencing item required
    pub materialized: usize,
}

impl CommitSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.materialized
    }
}

/// Apply every staged row to the store inside one transaction.
///
/// Inserts and updates run in store-declared type order, deletions in the
/// reverse order. Before a row is saved, every staged row it references is
/// saved first. Fails without touching the store if conflicts or incomplete
/// payloads remain. On success the staging store is cleared.
pub fn commit_changes<S: Store>(
    store: &mut S,
    staging: &mut StagingStore<S::Payload>,
) -> Result<CommitSummary> {
    let unresolved = staging.unresolved_count();
    if unresolved > 0 {
        return Err(Error::UnresolvedConflicts(unresolved));
    }
    if let Some(row) = staging
        .rows()
        .find(|row| row.status.is_save() && row.item.is_incomplete())
    {
        return Err(Error::IncompletePayload(row.item.identity.to_string()));
    }

    let Some(remote_knowledge) = staging.remote_knowledge().cloned() else {
        return Ok(CommitSummary::default());
    };

    store.begin_changes()?;
    match apply_staged(store, staging, &remote_knowledge) {
        Ok(summary) => {
            store.accept_changes()?;
            staging.clear();
            Ok(summary)
        }
        Err(e) => match store.reject_changes() {
            Ok(()) => Err(e),
            Err(rollback) => Err(Error::RollbackFailed {
                cause: Box::new(e),
                rollback: Box::new(rollback),
            }),
        },
    }
}

fn apply_staged<S: Store>(
    store: &mut S,
    staging: &StagingStore<S::Payload>,
    remote_knowledge: &Knowledge,
) -> Result<CommitSummary> {
    let item_types = store.item_types();
    let mut summary = CommitSummary::default();
    let mut applied = HashSet::new();

    for item_type in &item_types {
        for identity in staging.identities_of_type(item_type, |s| s.is_save()) {
            apply_with_references(store, staging, &identity, &mut applied, &mut summary)?;
        }
    }

    for item_type in item_types.iter().rev() {
        for identity in staging.identities_of_type(item_type, |s| s.is_delete()) {
            let row = staging
                .get(&identity)
                .ok_or_else(|| Error::ItemNotFound(identity.to_string()))?;
            store.delete_item(
                &row.item.identity,
                &row.item.stamp,
                row.item.replaced_by.as_ref(),
            )?;
            summary.deleted += 1;
        }
    }

    store.update_local_knowledge(remote_knowledge)?;
    Ok(summary)
}

enum Visit {
    Enter(ItemIdentity),
    Exit(ItemIdentity),
}

/// Depth-first walk over the reference graph with an explicit stack.
///
/// A row is saved only after every staged row it references. Meeting a row
/// that is still on the current path is a reference cycle.
fn apply_with_references<S: Store>(
    store: &mut S,
    staging: &StagingStore<S::Payload>,
    root: &ItemIdentity,
    applied: &mut HashSet<ItemIdentity>,
    summary: &mut CommitSummary,
) -> Result<()> {
    let mut stack = vec![Visit::Enter(root.clone())];
    let mut on_path = HashSet::new();

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(identity) => {
                if applied.contains(&identity) {
                    continue;
                }
                if !on_path.insert(identity.clone()) {
                    return Err(Error::ReferenceCycle(identity.to_string()));
                }
                let dependencies = pending_dependencies(&*store, staging, &identity)?;
                stack.push(Visit::Exit(identity));
                stack.extend(dependencies.into_iter().rev().map(Visit::Enter));
            }
            Visit::Exit(identity) => {
                on_path.remove(&identity);
                apply_row(store, staging, &identity, summary)?;
                applied.insert(identity);
            }
        }
    }

    Ok(())
}

/// Staged rows that must be saved before `identity`.
fn pending_dependencies<S: Store>(
    store: &S,
    staging: &StagingStore<S::Payload>,
    identity: &ItemIdentity,
) -> Result<Vec<ItemIdentity>> {
    let Some(row) = staging.get(identity) else {
        return Ok(Vec::new());
    };

    let mut dependencies = Vec::new();
    for item_ref in &row.item.item_refs {
        let target = &item_ref.identity;
        if target == identity || dependencies.contains(target) {
            continue;
        }
        let Some(staged) = staging.get(target) else {
            continue;
        };

        let needed = match staged.status {
            s if s.is_save() => true,
            SyncStatus::MayBeNeeded if staged.item.payload.is_some() => {
                match store.locate_current_item_info(target)? {
                    None => true,
                    Some(info) => info.deleted && info.replaced_by.is_none(),
                }
            }
            _ => false,
        };
        if needed {
            dependencies.push(target.clone());
        }
    }

    Ok(dependencies)
}

fn apply_row<S: Store>(
    store: &mut S,
    staging: &StagingStore<S::Payload>,
    identity: &ItemIdentity,
    summary: &mut CommitSummary,
) -> Result<()> {
    let row = staging
        .get(identity)
        .ok_or_else(|| Error::ItemNotFound(identity.to_string()))?;
    let mut item = row.item.clone();
    redirect_replaced_references(&*store, staging, &mut item)?;
    store.save_item_data(&item)?;

    match row.status {
        SyncStatus::Insert => summary.inserted += 1,
        SyncStatus::Update => summary.updated += 1,
        SyncStatus::MayBeNeeded => summary.materialized += 1,
        _ => {}
    }
    Ok(())
}

/// Follow replacement chains of folded duplicates so saved references
/// point at surviving items.
fn redirect_replaced_references<S: Store>(
    store: &S,
    staging: &StagingStore<S::Payload>,
    item: &mut SyncItem<S::Payload>,
) -> Result<()> {
    for item_ref in item.item_refs.iter_mut() {
        let mut current = item_ref.identity.clone();
        let mut seen = HashSet::new();

        loop {
            let replacement = match staging.get(&current) {
                Some(row) if row.status.is_delete() => row.item.replaced_by.clone(),
                Some(_) => None,
                None => match store.locate_current_item_info(&current)? {
                    Some(info) if info.deleted => info.replaced_by,
                    _ => None,
                },
            };
            match replacement {
                Some(next) if seen.insert(next.clone()) => current = next,
                _ => break,
            }
        }

        if current != item_ref.identity {
            let stamp = match staging.get(&current) {
                Some(row) => Some(row.item.stamp.clone()),
                None => store.locate_current_item_info(&current)?.map(|i| i.stamp),
            };
            item_ref.identity = current;
            if let Some(stamp) = stamp {
                item_ref.stamp = stamp;
            }
        }
    }
    Ok(())
}
