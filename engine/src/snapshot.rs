//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory store and persistent storage.
//! Items are kept in identity order so serialization is deterministic.

use crate::{
    error::Result, Error, Knowledge, MemoryStore, Payload, ReplicaId, Store, SyncItem, TickCount,
    WireItem,
};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    pub replica_id: ReplicaId,
    /// Local tick count at snapshot time
    pub tick_count: TickCount,
    /// Knowledge of other replicas
    pub knowledge: Knowledge,
    /// Live items and tombstones in identity order
    pub items: Vec<WireItem>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            replica_id: replica_id.into(),
            tick_count: 0,
            knowledge: Knowledge::new(),
            items: Vec::new(),
        }
    }

    /// Count items including tombstones.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Count live items.
    pub fn live_item_count(&self) -> usize {
        self.items.iter().filter(|i| !i.deleted).count()
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub replica_id: ReplicaId,
    pub tick_count: TickCount,
    pub item_count: usize,
    pub live_item_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            replica_id: snapshot.replica_id.clone(),
            tick_count: snapshot.tick_count,
            item_count: snapshot.item_count(),
            live_item_count: snapshot.live_item_count(),
        }
    }
}

impl<P: Payload> MemoryStore<P> {
    fn wire_items(&self) -> Result<Vec<WireItem>> {
        self.all_items()
            .map(|item| self.build_item_data(&item.info())?.to_wire())
            .collect()
    }

    /// Export the full state of the store.
    pub fn export_state(&self) -> Result<StoreSnapshot> {
        let mut knowledge = Knowledge::new();
        for stamp in self.generate_local_knowledge()?.iter() {
            if stamp.replica_id != self.replica_id() {
                knowledge.observe(&stamp);
            }
        }

        Ok(StoreSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            replica_id: self.replica_id().to_string(),
            tick_count: self.tick_count(),
            knowledge,
            items: self.wire_items()?,
        })
    }

    /// Replace the state of the store with a snapshot of the same replica.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        if snapshot.replica_id != self.replica_id() {
            return Err(Error::InvalidSnapshot(format!(
                "snapshot belongs to replica {}, not {}",
                snapshot.replica_id,
                self.replica_id()
            )));
        }

        let items = snapshot
            .items
            .into_iter()
            .map(SyncItem::from_wire)
            .collect::<Result<Vec<_>>>()?;
        self.restore(snapshot.tick_count, snapshot.knowledge, items);
        Ok(())
    }

    /// Replica-independent rendering of every item and tombstone.
    ///
    /// Two replicas that have converged render identically.
    pub fn canonical_state(&self) -> Result<String> {
        serde_json::to_string(&self.wire_items()?).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::tests::{tag, Note};

    fn populated() -> MemoryStore<Note> {
        let mut store = MemoryStore::new("a");
        let first = store.create(tag("x"), vec![]).unwrap();
        store
            .create(
                Note::Memo {
                    text: "m".into(),
                    tags: vec![0],
                },
                vec![first.clone()],
            )
            .unwrap();
        let gone = store.create(tag("y"), vec![]).unwrap();
        store.delete(&gone).unwrap();
        store
            .update_local_knowledge(&Knowledge::new().with("b", 7))
            .unwrap();
        store
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = StoreSnapshot::new("a");
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.item_count(), 0);
    }

    #[test]
    fn export_import_roundtrip() {
        let store = populated();
        let snapshot = store.export_state().unwrap();

        assert_eq!(snapshot.tick_count, 4);
        assert_eq!(snapshot.item_count(), 3);
        assert_eq!(snapshot.live_item_count(), 2);
        assert_eq!(snapshot.knowledge.get("b"), Some(7));

        let json = snapshot.to_json().unwrap();
        let mut restored = MemoryStore::<Note>::new("a");
        restored
            .import_state(StoreSnapshot::from_json(&json).unwrap())
            .unwrap();

        assert_eq!(restored.canonical_state().unwrap(), store.canonical_state().unwrap());
        assert_eq!(
            restored.generate_local_knowledge().unwrap(),
            store.generate_local_knowledge().unwrap()
        );
    }

    #[test]
    fn import_rejects_other_replica() {
        let snapshot = populated().export_state().unwrap();
        let mut other = MemoryStore::<Note>::new("b");
        assert!(matches!(
            other.import_state(snapshot),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn deterministic_serialization() {
        let one = populated().export_state().unwrap().to_json().unwrap();
        let two = populated().export_state().unwrap().to_json().unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn snapshot_metadata() {
        let snapshot = populated().export_state().unwrap();
        let metadata: SnapshotMetadata = (&snapshot).into();

        assert_eq!(metadata.replica_id, "a");
        assert_eq!(metadata.tick_count, 4);
        assert_eq!(metadata.item_count, 3);
        assert_eq!(metadata.live_item_count, 2);
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "replicaId": "a",
            "tickCount": 0,
            "knowledge": [],
            "items": []
        }"#;

        let result = StoreSnapshot::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }
}
