//! Sync status of a staged item and the rule deriving it.

use crate::{ItemInfo, Knowledge};
use serde::{Deserialize, Serialize};

/// What action, if any, a staged item needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Insert,
    InsertConflict,
    Update,
    UpdateConflict,
    Delete,
    DeleteNonExisting,
    DeleteConflict,
    /// Referenced but not yet materialized; pulled speculatively
    MayBeNeeded,
}

impl SyncStatus {
    /// Conflicts block commit until resolved.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SyncStatus::InsertConflict | SyncStatus::UpdateConflict | SyncStatus::DeleteConflict
        )
    }

    /// Statuses applied by a commit.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            SyncStatus::Insert | SyncStatus::Update | SyncStatus::Delete | SyncStatus::DeleteNonExisting
        )
    }

    /// Actionable statuses that write a live version.
    pub fn is_save(&self) -> bool {
        matches!(self, SyncStatus::Insert | SyncStatus::Update)
    }

    /// Actionable statuses that write a tombstone.
    pub fn is_delete(&self) -> bool {
        matches!(self, SyncStatus::Delete | SyncStatus::DeleteNonExisting)
    }
}

/// Derive the status of an incoming item against local state.
///
/// `remote_knowledge` is the knowledge of the replica that sent `remote`.
/// When it contains the local modification stamp, the remote version descends
/// from the local one and is applied as-is; otherwise both sides may have
/// diverged and the result is a conflict.
pub fn calculate_sync_status(
    remote: &ItemInfo,
    local: Option<&ItemInfo>,
    remote_knowledge: &Knowledge,
) -> SyncStatus {
    let Some(local) = local else {
        return if remote.deleted {
            SyncStatus::DeleteNonExisting
        } else {
            SyncStatus::Insert
        };
    };

    if remote.deleted && local.deleted {
        return SyncStatus::DeleteNonExisting;
    }

    if remote_knowledge.contains(&local.stamp) {
        if remote.deleted {
            SyncStatus::Delete
        } else if local.deleted {
            // The remote saw the deletion and still has a live version.
            SyncStatus::Insert
        } else {
            SyncStatus::Update
        }
    } else if remote.deleted || local.deleted {
        SyncStatus::DeleteConflict
    } else {
        SyncStatus::UpdateConflict
    }
}
