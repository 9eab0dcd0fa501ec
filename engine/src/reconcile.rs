//! Reconciliation of incoming items against local state.
//!
//! Given items received from a remote replica and the remote knowledge that
//! accompanied them, this module stages each item with its derived
//! [`SyncStatus`], folds independently created duplicates, surfaces real
//! conflicts and rewrites staged rows when the caller resolves them.
//!
//! # Algorithm
//!
//! 1. Stage every received item, deriving its status with
//!    [`calculate_sync_status`]
//! 2. Stage placeholders for referenced items that are locally tombstones
//! 3. Fold remote inserts that duplicate local, not yet shared items
//! 4. Collapse false update conflicts and return the rest to the caller

use crate::{
    calculate_sync_status, error::Result, DuplicateStatus, Error, ItemIdentity, ItemRef, Payload,
    StagingStore, Store, SyncItem, SyncStatus,
};
use serde::{Deserialize, Serialize};

/// A staged row the caller has to decide on.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConflict<P> {
    pub status: SyncStatus,
    /// Version received from the remote replica
    pub remote: SyncItem<P>,
    /// Local version; for a possible duplicate, the local look-alike
    pub local: Option<SyncItem<P>>,
}

impl<P> SyncConflict<P> {
    /// Identity of the staged row this conflict resolves.
    pub fn identity(&self) -> &ItemIdentity {
        &self.remote.identity
    }
}

/// How a conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    RemoteWins,
    LocalWins,
    Merge,
}

/// Outcome of duplicate detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSummary {
    /// Remote inserts collapsed onto a local item
    pub folded: usize,
    /// Remote inserts that may duplicate a local item
    pub possible: usize,
}

/// Stage one received item, deriving its status against local state and
/// the remote knowledge recorded in `staging`.
pub fn stage_incoming<S: Store>(
    store: &S,
    staging: &mut StagingStore<S::Payload>,
    item: SyncItem<S::Payload>,
) -> Result<SyncStatus> {
    let local = store.locate_current_item_info(&item.identity)?;
    let status = {
        let remote_knowledge = staging.remote_knowledge().ok_or_else(|| {
            Error::InvalidRequest("items received before knowledge exchange".into())
        })?;
        calculate_sync_status(&item.info(), local.as_ref(), remote_knowledge)
    };
    staging.stage(item, status);
    Ok(status)
}

/// Stage a `MayBeNeeded` placeholder for every item referenced by the row
/// `identity` that is locally a tombstone with no replacement.
///
/// Returns the number of placeholders added.
pub fn stage_referenced_placeholders<S: Store>(
    store: &S,
    staging: &mut StagingStore<S::Payload>,
    identity: &ItemIdentity,
) -> Result<usize> {
    let refs: Vec<ItemRef> = match staging.get(identity) {
        Some(row) if !row.item.deleted => row.item.item_refs.clone(),
        _ => return Ok(0),
    };

    let mut added = 0;
    for item_ref in refs {
        if staging.contains(&item_ref.identity) {
            continue;
        }
        let orphaned = matches!(
            store.locate_current_item_info(&item_ref.identity)?,
            Some(info) if info.deleted && info.replaced_by.is_none()
        );
        if orphaned && staging.stage_placeholder(item_ref.identity, item_ref.stamp) {
            added += 1;
        }
    }
    Ok(added)
}

/// Fill a placeholder with the remote copy fetched for it.
///
/// A remote copy that is missing or deleted drops the placeholder: there is
/// nothing to rescue. Otherwise placeholders are staged in turn for the
/// filled item's own references.
pub fn fill_placeholder<S: Store>(
    store: &S,
    staging: &mut StagingStore<S::Payload>,
    identity: &ItemIdentity,
    remote: Option<SyncItem<S::Payload>>,
) -> Result<usize> {
    match remote {
        Some(item) if !item.deleted && item.payload.is_some() => {
            if let Some(row) = staging.get_mut(identity) {
                row.item = item;
            }
            stage_referenced_placeholders(store, staging, identity)
        }
        _ => {
            staging.remove(identity);
            Ok(0)
        }
    }
}

/// Fold remote inserts onto local items that duplicate them.
///
/// Candidates are live local items of the same type whose creation the
/// remote replica has not observed. Types are processed in store-declared
/// order so references rewritten by folding a parent are in place when its
/// dependents are compared.
pub fn detect_duplicates<S: Store>(
    store: &mut S,
    staging: &mut StagingStore<S::Payload>,
) -> Result<DuplicateSummary> {
    let mut summary = DuplicateSummary::default();
    let Some(remote_knowledge) = staging.remote_knowledge().cloned() else {
        return Ok(summary);
    };

    let local_only: Vec<_> = store
        .locate_changed_items(&remote_knowledge)?
        .into_iter()
        .filter(|info| {
            !info.deleted
                && !remote_knowledge.contains(&info.identity.creation_stamp())
                && !staging.contains(&info.identity)
        })
        .collect();
    if local_only.is_empty() {
        return Ok(summary);
    }

    for item_type in store.item_types() {
        let candidates = local_only
            .iter()
            .filter(|info| info.identity.item_type == item_type)
            .map(|info| store.build_item_data(info))
            .collect::<Result<Vec<_>>>()?;
        if candidates.is_empty() {
            continue;
        }

        for remote_id in staging.identities_of_type(&item_type, |s| s == SyncStatus::Insert) {
            let Some(remote) = staging.get(&remote_id).map(|row| row.item.clone()) else {
                continue;
            };

            let mut possible = None;
            let mut exact = None;
            for local in &candidates {
                match store.duplicate_status(local, &remote) {
                    DuplicateStatus::Exact => {
                        exact = Some(local);
                        break;
                    }
                    DuplicateStatus::Possible if possible.is_none() => {
                        possible = Some(local.identity.clone());
                    }
                    _ => {}
                }
            }

            if let Some(local) = exact {
                fold_duplicate(store, staging, &remote_id, local)?;
                summary.folded += 1;
            } else if let Some(local_id) = possible {
                if let Some(row) = staging.get_mut(&remote_id) {
                    row.status = SyncStatus::InsertConflict;
                    row.conflict_with = Some(local_id);
                }
                summary.possible += 1;
            }
        }
    }

    Ok(summary)
}

/// Collapse the staged remote insert `remote_id` onto `local`.
///
/// Staged references to the remote identity are redirected to the local
/// one and the remote row becomes a tombstone with a fresh local stamp that
/// names the survivor.
fn fold_duplicate<S: Store>(
    store: &mut S,
    staging: &mut StagingStore<S::Payload>,
    remote_id: &ItemIdentity,
    local: &SyncItem<S::Payload>,
) -> Result<()> {
    let target = ItemRef::new(local.identity.clone(), local.stamp.clone());
    staging.rewrite_references(remote_id, &target);

    let stamp = store.increment_local_tick_count()?;
    let row = staging
        .get_mut(remote_id)
        .ok_or_else(|| Error::ItemNotFound(remote_id.to_string()))?;
    row.item = SyncItem::tombstone(remote_id.clone(), stamp, Some(local.identity.clone()));
    row.status = SyncStatus::DeleteNonExisting;
    row.conflict_with = None;
    Ok(())
}

/// Collect every unresolved staged row as a [`SyncConflict`].
///
/// Update conflicts where both sides hold the same content are resolved on
/// the spot as an update carrying the remote stamp.
pub fn load_conflicts<S: Store>(
    store: &S,
    staging: &mut StagingStore<S::Payload>,
) -> Result<Vec<SyncConflict<S::Payload>>> {
    let unresolved: Vec<ItemIdentity> = staging
        .unresolved()
        .map(|row| row.item.identity.clone())
        .collect();

    let mut conflicts = Vec::new();
    for identity in unresolved {
        let Some(row) = staging.get(&identity).cloned() else {
            continue;
        };

        let local = match (row.status, &row.conflict_with) {
            (SyncStatus::InsertConflict, Some(local_id)) => local_item(store, local_id)?,
            _ => local_item(store, &identity)?,
        };

        if row.status == SyncStatus::UpdateConflict {
            if let Some(local) = &local {
                if !local.deleted && row.item.same_content(local) {
                    if let Some(row) = staging.get_mut(&identity) {
                        row.status = SyncStatus::Update;
                    }
                    continue;
                }
            }
        }

        conflicts.push(SyncConflict {
            status: row.status,
            remote: row.item,
            local,
        });
    }

    Ok(conflicts)
}

fn local_item<S: Store>(store: &S, identity: &ItemIdentity) -> Result<Option<SyncItem<S::Payload>>> {
    match store.locate_current_item_info(identity)? {
        Some(info) => Ok(Some(store.build_item_data(&info)?)),
        None => Ok(None),
    }
}

fn conflict_row<P: Payload>(
    staging: &StagingStore<P>,
    identity: &ItemIdentity,
) -> Result<(SyncItem<P>, SyncStatus, Option<ItemIdentity>)> {
    match staging.get(identity) {
        Some(row) if row.status.is_conflict() => {
            Ok((row.item.clone(), row.status, row.conflict_with.clone()))
        }
        _ => Err(Error::InvalidRequest(format!("no conflict staged for {identity}"))),
    }
}

fn restage<P: Payload>(
    staging: &mut StagingStore<P>,
    identity: &ItemIdentity,
    item: SyncItem<P>,
    status: SyncStatus,
) {
    if let Some(row) = staging.get_mut(identity) {
        row.item = item;
        row.status = status;
        row.conflict_with = None;
    }
}

/// Accept the remote version of a conflicting item.
pub fn resolve_remote_wins<S: Store>(
    store: &mut S,
    staging: &mut StagingStore<S::Payload>,
    identity: &ItemIdentity,
) -> Result<()> {
    let (remote, status, _) = conflict_row(staging, identity)?;
    let stamp = store.increment_local_tick_count()?;

    let (item, status) = if remote.deleted {
        (
            SyncItem::tombstone(identity.clone(), stamp, remote.replaced_by),
            SyncStatus::Delete,
        )
    } else {
        let next = match status {
            SyncStatus::UpdateConflict => SyncStatus::Update,
            _ => SyncStatus::Insert,
        };
        (SyncItem { stamp, ..remote }, next)
    };

    restage(staging, identity, item, status);
    Ok(())
}

/// Keep the local version of a conflicting item.
///
/// For a possible duplicate the remote insert is folded onto the local
/// look-alike.
pub fn resolve_local_wins<S: Store>(
    store: &mut S,
    staging: &mut StagingStore<S::Payload>,
    identity: &ItemIdentity,
) -> Result<()> {
    let (_, status, conflict_with) = conflict_row(staging, identity)?;

    if status == SyncStatus::InsertConflict {
        let local_id = conflict_with
            .ok_or_else(|| Error::InvalidRequest(format!("no local candidate for {identity}")))?;
        let local = local_item(store, &local_id)?
            .filter(|item| !item.deleted)
            .ok_or_else(|| Error::ItemNotFound(local_id.to_string()))?;
        return fold_duplicate(store, staging, identity, &local);
    }

    let local = local_item(store, identity)?.ok_or_else(|| Error::ItemNotFound(identity.to_string()))?;
    let stamp = store.increment_local_tick_count()?;

    let (item, status) = if local.deleted {
        (
            SyncItem::tombstone(identity.clone(), stamp, local.replaced_by),
            SyncStatus::Delete,
        )
    } else {
        (SyncItem { stamp, ..local }, SyncStatus::Update)
    };

    restage(staging, identity, item, status);
    Ok(())
}

/// Replace a conflicting item with a caller-supplied merge.
pub fn resolve_merge<S: Store>(
    store: &mut S,
    staging: &mut StagingStore<S::Payload>,
    identity: &ItemIdentity,
    payload: S::Payload,
    item_refs: Vec<ItemRef>,
) -> Result<()> {
    conflict_row(staging, identity)?;
    if payload.item_type() != identity.item_type {
        return Err(Error::InvalidPayload(format!(
            "{} payload for {} item",
            payload.item_type(),
            identity.item_type
        )));
    }

    let stamp = store.increment_local_tick_count()?;
    let item = SyncItem::live(identity.clone(), stamp, payload, item_refs);
    restage(staging, identity, item, SyncStatus::Update);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::tests::{identity, tag, Note};
    use crate::{commit_changes, Knowledge, MemoryStore, Stamp};

    fn remote_tag(tick: u64, label: &str) -> SyncItem<Note> {
        SyncItem::live(identity("tag", "b", tick), Stamp::new("b", tick), tag(label), vec![])
    }

    fn staging_from_b(tick: u64) -> StagingStore<Note> {
        let mut staging = StagingStore::new();
        staging.begin(Knowledge::new().with("b", tick));
        staging
    }

    #[test]
    fn stage_incoming_requires_knowledge() {
        let store = MemoryStore::<Note>::new("a");
        let mut staging = StagingStore::new();
        let result = stage_incoming(&store, &mut staging, remote_tag(1, "x"));
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn stage_incoming_derives_status() {
        let mut store = MemoryStore::<Note>::new("a");
        let local = store.create(tag("mine"), vec![]).unwrap();
        let mut staging = staging_from_b(3);

        let status = stage_incoming(&store, &mut staging, remote_tag(1, "x")).unwrap();
        assert_eq!(status, SyncStatus::Insert);

        let concurrent = SyncItem::live(local.clone(), Stamp::new("b", 3), tag("theirs"), vec![]);
        let status = stage_incoming(&store, &mut staging, concurrent).unwrap();
        assert_eq!(status, SyncStatus::UpdateConflict);
        assert_eq!(staging.received_count(), 2);
    }

    #[test]
    fn exact_duplicate_is_folded_and_references_follow() {
        let mut store = MemoryStore::<Note>::new("a");
        let local = store.create(tag("same"), vec![]).unwrap();
        let mut staging = staging_from_b(2);

        stage_incoming(&store, &mut staging, remote_tag(1, "same")).unwrap();
        let memo = SyncItem::live(
            identity("memo", "b", 2),
            Stamp::new("b", 2),
            Note::Memo {
                text: "m".into(),
                tags: vec![0],
            },
            vec![ItemRef::new(identity("tag", "b", 1), Stamp::new("b", 1))],
        );
        stage_incoming(&store, &mut staging, memo).unwrap();

        let summary = detect_duplicates(&mut store, &mut staging).unwrap();
        assert_eq!(summary.folded, 1);

        let folded = staging.get(&identity("tag", "b", 1)).unwrap();
        assert_eq!(folded.status, SyncStatus::DeleteNonExisting);
        assert_eq!(folded.item.replaced_by, Some(local.clone()));
        assert_eq!(folded.item.stamp, Stamp::new("a", 2));

        let memo = staging.get(&identity("memo", "b", 2)).unwrap();
        assert_eq!(memo.item.item_refs[0].identity, local);

        commit_changes(&mut store, &mut staging).unwrap();
        assert_eq!(store.live_of_type("tag").count(), 1);
    }

    #[test]
    fn possible_duplicate_becomes_insert_conflict() {
        let mut store = MemoryStore::<Note>::new("a");
        let local = store.create(tag("Same"), vec![]).unwrap();
        let mut staging = staging_from_b(1);
        stage_incoming(&store, &mut staging, remote_tag(1, "same")).unwrap();

        let summary = detect_duplicates(&mut store, &mut staging).unwrap();
        assert_eq!(summary.possible, 1);

        let conflicts = load_conflicts(&store, &mut staging).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].status, SyncStatus::InsertConflict);
        assert_eq!(conflicts[0].local.as_ref().unwrap().identity, local);
    }

    #[test]
    fn items_known_to_remote_are_not_duplicate_candidates() {
        let mut store = MemoryStore::<Note>::new("a");
        store.create(tag("same"), vec![]).unwrap();
        let mut staging = StagingStore::new();
        staging.begin(Knowledge::new().with("a", 1).with("b", 1));
        stage_incoming(&store, &mut staging, remote_tag(1, "same")).unwrap();

        let summary = detect_duplicates(&mut store, &mut staging).unwrap();
        assert_eq!(summary, DuplicateSummary::default());
    }

    #[test]
    fn identical_concurrent_update_is_not_a_conflict() {
        let mut store = MemoryStore::<Note>::new("a");
        let id = store.create(tag("same"), vec![]).unwrap();
        let mut staging = staging_from_b(4);
        let remote = SyncItem::live(id.clone(), Stamp::new("b", 4), tag("same"), vec![]);
        stage_incoming(&store, &mut staging, remote).unwrap();

        let conflicts = load_conflicts(&store, &mut staging).unwrap();

        assert!(conflicts.is_empty());
        let row = staging.get(&id).unwrap();
        assert_eq!(row.status, SyncStatus::Update);
        assert_eq!(row.item.stamp, Stamp::new("b", 4));
    }

    #[test]
    fn each_resolution_takes_one_tick() {
        for resolution in [
            ConflictResolution::RemoteWins,
            ConflictResolution::LocalWins,
            ConflictResolution::Merge,
        ] {
            let mut store = MemoryStore::<Note>::new("a");
            let id = store.create(tag("mine"), vec![]).unwrap();
            let mut staging = staging_from_b(4);
            let remote = SyncItem::live(id.clone(), Stamp::new("b", 4), tag("theirs"), vec![]);
            stage_incoming(&store, &mut staging, remote).unwrap();
            assert_eq!(load_conflicts(&store, &mut staging).unwrap().len(), 1);

            match resolution {
                ConflictResolution::RemoteWins => {
                    resolve_remote_wins(&mut store, &mut staging, &id).unwrap()
                }
                ConflictResolution::LocalWins => {
                    resolve_local_wins(&mut store, &mut staging, &id).unwrap()
                }
                ConflictResolution::Merge => {
                    resolve_merge(&mut store, &mut staging, &id, tag("both"), vec![]).unwrap()
                }
            }

            assert_eq!(store.tick_count(), 2);
            let row = staging.get(&id).unwrap();
            assert_eq!(row.status, SyncStatus::Update);
            assert_eq!(row.item.stamp, Stamp::new("a", 2));
            let expected = match resolution {
                ConflictResolution::RemoteWins => tag("theirs"),
                ConflictResolution::LocalWins => tag("mine"),
                ConflictResolution::Merge => tag("both"),
            };
            assert_eq!(row.item.payload, Some(expected));

            commit_changes(&mut store, &mut staging).unwrap();
            assert!(load_conflicts(&store, &mut staging).unwrap().is_empty());
        }
    }

    #[test]
    fn delete_conflict_resolutions() {
        let mut store = MemoryStore::<Note>::new("a");
        let id = store.create(tag("mine"), vec![]).unwrap();
        let mut staging = staging_from_b(4);
        let remote = SyncItem::tombstone(id.clone(), Stamp::new("b", 4), None);
        stage_incoming(&store, &mut staging, remote.clone()).unwrap();
        assert_eq!(staging.get(&id).unwrap().status, SyncStatus::DeleteConflict);

        resolve_remote_wins(&mut store, &mut staging, &id).unwrap();
        assert_eq!(staging.get(&id).unwrap().status, SyncStatus::Delete);

        let mut staging = staging_from_b(4);
        stage_incoming(&store, &mut staging, remote).unwrap();
        resolve_local_wins(&mut store, &mut staging, &id).unwrap();
        let row = staging.get(&id).unwrap();
        assert_eq!(row.status, SyncStatus::Update);
        assert_eq!(row.item.payload, Some(tag("mine")));
    }

    #[test]
    fn local_wins_on_possible_duplicate_folds() {
        let mut store = MemoryStore::<Note>::new("a");
        let local = store.create(tag("Same"), vec![]).unwrap();
        let mut staging = staging_from_b(1);
        stage_incoming(&store, &mut staging, remote_tag(1, "same")).unwrap();
        detect_duplicates(&mut store, &mut staging).unwrap();

        resolve_local_wins(&mut store, &mut staging, &identity("tag", "b", 1)).unwrap();

        let row = staging.get(&identity("tag", "b", 1)).unwrap();
        assert_eq!(row.status, SyncStatus::DeleteNonExisting);
        assert_eq!(row.item.replaced_by, Some(local));
    }

    #[test]
    fn resolving_a_settled_row_is_rejected() {
        let mut store = MemoryStore::<Note>::new("a");
        let mut staging = staging_from_b(1);
        stage_incoming(&store, &mut staging, remote_tag(1, "x")).unwrap();

        let result = resolve_remote_wins(&mut store, &mut staging, &identity("tag", "b", 1));
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert_eq!(store.tick_count(), 0);
    }

    #[test]
    fn merge_rejects_wrong_type() {
        let mut store = MemoryStore::<Note>::new("a");
        let id = store.create(tag("mine"), vec![]).unwrap();
        let mut staging = staging_from_b(4);
        let remote = SyncItem::live(id.clone(), Stamp::new("b", 4), tag("theirs"), vec![]);
        stage_incoming(&store, &mut staging, remote).unwrap();

        let memo = Note::Memo {
            text: "m".into(),
            tags: vec![],
        };
        let result = resolve_merge(&mut store, &mut staging, &id, memo, vec![]);
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn placeholders_track_orphaned_references() {
        let mut store = MemoryStore::<Note>::new("a");
        let gone = store.create(tag("gone"), vec![]).unwrap();
        store.delete(&gone).unwrap();
        let mut staging = staging_from_b(5);

        let memo = SyncItem::live(
            identity("memo", "b", 5),
            Stamp::new("b", 5),
            Note::Memo {
                text: "m".into(),
                tags: vec![0],
            },
            vec![ItemRef::new(gone.clone(), Stamp::new("a", 1))],
        );
        stage_incoming(&store, &mut staging, memo).unwrap();
        let added =
            stage_referenced_placeholders(&store, &mut staging, &identity("memo", "b", 5)).unwrap();
        assert_eq!(added, 1);
        assert_eq!(staging.placeholders_to_fill(), vec![gone.clone()]);

        let copy = SyncItem::live(gone.clone(), Stamp::new("a", 1), tag("gone"), vec![]);
        fill_placeholder(&store, &mut staging, &gone, Some(copy)).unwrap();
        assert!(staging.placeholders_to_fill().is_empty());

        let summary = commit_changes(&mut store, &mut staging).unwrap();
        assert_eq!(summary.materialized, 1);
        assert!(store.get(&gone).is_some());
    }

    #[test]
    fn deleted_remote_copy_drops_placeholder() {
        let store = MemoryStore::<Note>::new("a");
        let mut staging = staging_from_b(1);
        staging.stage_placeholder(identity("tag", "a", 1), Stamp::new("a", 1));

        let tombstone = SyncItem::tombstone(identity("tag", "a", 1), Stamp::new("b", 1), None);
        fill_placeholder(&store, &mut staging, &identity("tag", "a", 1), Some(tombstone)).unwrap();
        assert!(staging.is_empty());
    }
}
