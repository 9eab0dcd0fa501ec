//! Session-scoped staging of inbound items before they are durably applied.
//!
//! Rows are keyed by creation identity. The remote knowledge that produced
//! them is kept with the rows so that a commit after conflict resolution can
//! advance local knowledge without re-fetching anything.

use crate::{ItemIdentity, ItemRef, Knowledge, Stamp, SyncItem, SyncStatus};
use std::collections::{BTreeMap, BTreeSet};

/// One staged row.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedItem<P> {
    pub item: SyncItem<P>,
    pub status: SyncStatus,
    /// Local item a possible duplicate collides with
    pub conflict_with: Option<ItemIdentity>,
}

/// Holding area for the current session's working set.
#[derive(Debug, Clone)]
pub struct StagingStore<P> {
    rows: BTreeMap<ItemIdentity, StagedItem<P>>,
    remote_knowledge: Option<Knowledge>,
    received: BTreeSet<ItemIdentity>,
}

impl<P> Default for StagingStore<P> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            remote_knowledge: None,
            received: BTreeSet::new(),
        }
    }
}

impl<P: Clone> StagingStore<P> {
    /// Create an empty staging store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wipe all rows and the recorded remote knowledge.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.remote_knowledge = None;
        self.received.clear();
    }

    /// Wipe and start staging changes described by `remote_knowledge`.
    pub fn begin(&mut self, remote_knowledge: Knowledge) {
        self.clear();
        self.remote_knowledge = Some(remote_knowledge);
    }

    /// Knowledge of the replica the staged rows came from.
    pub fn remote_knowledge(&self) -> Option<&Knowledge> {
        self.remote_knowledge.as_ref()
    }

    /// Stage an item received from the remote side, replacing any row
    /// with the same identity.
    pub fn stage(&mut self, item: SyncItem<P>, status: SyncStatus) {
        self.received.insert(item.identity.clone());
        self.rows.insert(
            item.identity.clone(),
            StagedItem {
                item,
                status,
                conflict_with: None,
            },
        );
    }

    /// Stage a `MayBeNeeded` placeholder unless a row already exists.
    ///
    /// Returns whether a placeholder was added.
    pub fn stage_placeholder(&mut self, identity: ItemIdentity, stamp: Stamp) -> bool {
        if self.rows.contains_key(&identity) {
            return false;
        }
        self.rows.insert(
            identity.clone(),
            StagedItem {
                item: SyncItem::placeholder(identity, stamp),
                status: SyncStatus::MayBeNeeded,
                conflict_with: None,
            },
        );
        true
    }

    pub fn get(&self, identity: &ItemIdentity) -> Option<&StagedItem<P>> {
        self.rows.get(identity)
    }

    pub fn get_mut(&mut self, identity: &ItemIdentity) -> Option<&mut StagedItem<P>> {
        self.rows.get_mut(identity)
    }

    pub fn contains(&self, identity: &ItemIdentity) -> bool {
        self.rows.contains_key(identity)
    }

    pub fn remove(&mut self, identity: &ItemIdentity) -> Option<StagedItem<P>> {
        self.rows.remove(identity)
    }

    /// All rows in identity order.
    pub fn rows(&self) -> impl Iterator<Item = &StagedItem<P>> {
        self.rows.values()
    }

    /// Identities of rows of one item type whose status matches `filter`.
    pub fn identities_of_type(
        &self,
        item_type: &str,
        filter: impl Fn(SyncStatus) -> bool,
    ) -> Vec<ItemIdentity> {
        self.rows
            .values()
            .filter(|row| row.item.identity.item_type == item_type && filter(row.status))
            .map(|row| row.item.identity.clone())
            .collect()
    }

    /// Point every staged reference at `from` to `to` instead.
    ///
    /// Returns the number of references rewritten.
    pub fn rewrite_references(&mut self, from: &ItemIdentity, to: &ItemRef) -> usize {
        let mut rewritten = 0;
        for row in self.rows.values_mut() {
            for item_ref in row.item.item_refs.iter_mut() {
                if &item_ref.identity == from {
                    *item_ref = to.clone();
                    rewritten += 1;
                }
            }
        }
        rewritten
    }

    /// Rows still in a conflict status.
    pub fn unresolved(&self) -> impl Iterator<Item = &StagedItem<P>> {
        self.rows.values().filter(|row| row.status.is_conflict())
    }

    /// Number of rows still in a conflict status.
    pub fn unresolved_count(&self) -> usize {
        self.unresolved().count()
    }

    /// Placeholders whose payload has not been fetched yet.
    pub fn placeholders_to_fill(&self) -> Vec<ItemIdentity> {
        self.rows
            .values()
            .filter(|row| row.status == SyncStatus::MayBeNeeded && row.item.is_incomplete())
            .map(|row| row.item.identity.clone())
            .collect()
    }

    /// Number of distinct items staged through [`StagingStore::stage`]
    /// since the last clear.
    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
