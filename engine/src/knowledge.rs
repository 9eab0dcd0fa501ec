//! Replica knowledge for detecting which versions another replica has seen.
//!
//! Knowledge maps every replica ever observed to the highest tick count
//! observed from it. A modification stamp is "known" when the entry for its
//! replica has reached the stamp's tick. A missing entry means unknown, not zero.

use crate::{ReplicaId, TickCount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A `(replica, tick)` pair recorded at creation or modification time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    /// Replica that performed the mutation
    pub replica_id: ReplicaId,
    /// Tick count of that replica at mutation time
    pub tick_count: TickCount,
}

impl Stamp {
    /// Create a stamp.
    pub fn new(replica_id: impl Into<ReplicaId>, tick_count: TickCount) -> Self {
        Self {
            replica_id: replica_id.into(),
            tick_count,
        }
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.replica_id, self.tick_count)
    }
}

/// How far each replica's history has been observed.
///
/// Serialized as a list of `{replicaId, tickCount}` pairs in replica order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Stamp>", into = "Vec<Stamp>")]
pub struct Knowledge {
    entries: BTreeMap<ReplicaId, TickCount>,
}

impl Knowledge {
    /// Create empty knowledge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to record an entry.
    pub fn with(mut self, replica_id: impl Into<ReplicaId>, tick_count: TickCount) -> Self {
        self.observe(&Stamp::new(replica_id, tick_count));
        self
    }

    /// Whether the version identified by `stamp` has been observed.
    pub fn contains(&self, stamp: &Stamp) -> bool {
        self.entries
            .get(&stamp.replica_id)
            .is_some_and(|tick| *tick >= stamp.tick_count)
    }

    /// Highest tick observed for a replica.
    pub fn get(&self, replica_id: &str) -> Option<TickCount> {
        self.entries.get(replica_id).copied()
    }

    /// Raise the entry for the stamp's replica to at least its tick.
    pub fn observe(&mut self, stamp: &Stamp) {
        let entry = self.entries.entry(stamp.replica_id.clone()).or_insert(0);
        *entry = (*entry).max(stamp.tick_count);
    }

    /// Merge another knowledge into this one, keeping the maximum per replica.
    pub fn merge(&mut self, other: &Knowledge) {
        for (replica_id, tick) in &other.entries {
            let entry = self.entries.entry(replica_id.clone()).or_insert(0);
            *entry = (*entry).max(*tick);
        }
    }

    /// Iterate entries as stamps in replica order.
    pub fn iter(&self) -> impl Iterator<Item = Stamp> + '_ {
        self.entries
            .iter()
            .map(|(replica_id, tick)| Stamp::new(replica_id.clone(), *tick))
    }

    /// Number of replicas observed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no replica has been observed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<Stamp>> for Knowledge {
    fn from(stamps: Vec<Stamp>) -> Self {
        let mut knowledge = Knowledge::new();
        for stamp in &stamps {
            knowledge.observe(stamp);
        }
        knowledge
    }
}

impl From<Knowledge> for Vec<Stamp> {
    fn from(knowledge: Knowledge) -> Self {
        knowledge.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_knowledge_contains_nothing() {
        let knowledge = Knowledge::new();
        assert!(!knowledge.contains(&Stamp::new("a", 0)));
        assert!(knowledge.is_empty());
    }

    #[test]
    fn contains_up_to_tick() {
        let knowledge = Knowledge::new().with("a", 5);
        assert!(knowledge.contains(&Stamp::new("a", 0)));
        assert!(knowledge.contains(&Stamp::new("a", 5)));
        assert!(!knowledge.contains(&Stamp::new("a", 6)));
    }

    #[test]
    fn absence_is_unknown_not_zero() {
        let knowledge = Knowledge::new().with("a", 5);
        assert!(!knowledge.contains(&Stamp::new("b", 0)));
        assert_eq!(knowledge.get("b"), None);
    }

    #[test]
    fn observe_never_lowers() {
        let mut knowledge = Knowledge::new().with("a", 7);
        knowledge.observe(&Stamp::new("a", 3));
        assert_eq!(knowledge.get("a"), Some(7));
        knowledge.observe(&Stamp::new("a", 9));
        assert_eq!(knowledge.get("a"), Some(9));
    }

    #[test]
    fn merge_takes_max_per_replica() {
        let mut left = Knowledge::new().with("a", 3).with("b", 10);
        let right = Knowledge::new().with("a", 7).with("b", 2).with("c", 1);
        left.merge(&right);

        assert_eq!(left.get("a"), Some(7));
        assert_eq!(left.get("b"), Some(10));
        assert_eq!(left.get("c"), Some(1));
        assert_eq!(left.len(), 3);
    }

    #[test]
    fn serialization_format() {
        let knowledge = Knowledge::new().with("b", 2).with("a", 1);
        let json = serde_json::to_string(&knowledge).unwrap();
        assert_eq!(
            json,
            r#"[{"replicaId":"a","tickCount":1},{"replicaId":"b","tickCount":2}]"#
        );

        let parsed: Knowledge = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, knowledge);
    }

    #[test]
    fn duplicate_entries_collapse_to_max() {
        let parsed: Knowledge = serde_json::from_str(
            r#"[{"replicaId":"a","tickCount":4},{"replicaId":"a","tickCount":2}]"#,
        )
        .unwrap();
        assert_eq!(parsed.get("a"), Some(4));
        assert_eq!(parsed.len(), 1);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_knowledge() -> impl Strategy<Value = Knowledge> {
            proptest::collection::vec(("[a-d]", 0u64..50), 0..6).prop_map(|entries| {
                entries
                    .into_iter()
                    .fold(Knowledge::new(), |k, (r, t)| k.with(r, t))
            })
        }

        proptest! {
            #[test]
            fn prop_merge_is_commutative(a in arb_knowledge(), b in arb_knowledge()) {
                let mut ab = a.clone();
                ab.merge(&b);
                let mut ba = b.clone();
                ba.merge(&a);
                prop_assert_eq!(ab, ba);
            }

            #[test]
            fn prop_merge_contains_both(a in arb_knowledge(), b in arb_knowledge()) {
                let mut merged = a.clone();
                merged.merge(&b);
                for stamp in a.iter().chain(b.iter()) {
                    prop_assert!(merged.contains(&stamp));
                }
            }
        }
    }
}
