//! Item identity, modification stamps, tombstones and the wire item shape.

use crate::{error::Result, Error, ItemType, ReplicaId, Stamp, TickCount};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Type-specific fields of an item as carried on the wire.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Immutable creation identity: the sole key for "is this the same logical item".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemIdentity {
    #[serde(rename = "itemType")]
    pub item_type: ItemType,
    #[serde(rename = "creationReplicaID")]
    pub created_replica_id: ReplicaId,
    #[serde(rename = "creationTickCount")]
    pub created_tick_count: TickCount,
}

impl ItemIdentity {
    /// Create an identity from its creation stamp.
    pub fn new(item_type: impl Into<ItemType>, created: &Stamp) -> Self {
        Self {
            item_type: item_type.into(),
            created_replica_id: created.replica_id.clone(),
            created_tick_count: created.tick_count,
        }
    }

    /// The stamp recorded when the item was created.
    pub fn creation_stamp(&self) -> Stamp {
        Stamp::new(self.created_replica_id.clone(), self.created_tick_count)
    }
}

impl std::fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.item_type, self.created_replica_id, self.created_tick_count
        )
    }
}

/// A pointer from one item to another by creation and modification identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub identity: ItemIdentity,
    pub stamp: Stamp,
}

impl ItemRef {
    pub fn new(identity: ItemIdentity, stamp: Stamp) -> Self {
        Self { identity, stamp }
    }
}

/// Current local state of an item, as located by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub identity: ItemIdentity,
    /// Stamp of the most recent mutation
    pub stamp: Stamp,
    /// Tombstone flag
    pub deleted: bool,
    /// Surviving identity when this tombstone came from duplicate folding
    pub replaced_by: Option<ItemIdentity>,
}

impl ItemInfo {
    /// Build the info of a live item.
    pub fn live(identity: ItemIdentity, stamp: Stamp) -> Self {
        Self {
            identity,
            stamp,
            deleted: false,
            replaced_by: None,
        }
    }

    /// Build the info of a tombstone.
    pub fn tombstone(identity: ItemIdentity, stamp: Stamp) -> Self {
        Self {
            identity,
            stamp,
            deleted: true,
            replaced_by: None,
        }
    }
}

/// Result of comparing two independently created items of the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicateStatus {
    None,
    Possible,
    Exact,
}

/// Per-type codec for item payloads.
///
/// Implemented by a domain enum with one variant per item type, so every
/// dispatch on the type tag is a `match` checked for exhaustiveness.
pub trait Payload: Clone + std::fmt::Debug + PartialEq + Send + Sync + 'static {
    /// All item types in dependency order: referenced types come before
    /// the types that reference them.
    fn item_types() -> &'static [&'static str];

    /// Type tag of this payload.
    fn item_type(&self) -> &'static str;

    /// Encode the type-specific fields. References are encoded as indices
    /// into the enclosing item's reference list.
    fn to_fields(&self) -> Result<Fields>;

    /// Decode the type-specific fields of an item of the given type.
    fn from_fields(item_type: &str, fields: Fields) -> Result<Self>;

    /// Domain equality between a local and a remote payload.
    fn duplicate_status(&self, refs: &[ItemRef], other: &Self, other_refs: &[ItemRef])
        -> DuplicateStatus;

    /// Whether the type tag is registered.
    fn is_known_type(item_type: &str) -> bool {
        Self::item_types().contains(&item_type)
    }

    /// Registered item types as owned names.
    fn item_type_names() -> Vec<ItemType> {
        Self::item_types().iter().map(|t| t.to_string()).collect()
    }
}

/// Encode a serializable struct into wire fields.
pub fn encode_fields<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(Error::InvalidPayload("payload must be an object".into())),
        Err(e) => Err(Error::InvalidPayload(e.to_string())),
    }
}

/// Decode wire fields into a struct.
pub fn decode_fields<T: DeserializeOwned>(fields: Fields) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(fields))
        .map_err(|e| Error::InvalidPayload(e.to_string()))
}

/// One item exchanged during a sync session: a live version or a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncItem<P> {
    pub identity: ItemIdentity,
    /// Modification stamp of this version
    pub stamp: Stamp,
    pub deleted: bool,
    pub replaced_by: Option<ItemIdentity>,
    pub item_refs: Vec<ItemRef>,
    /// Payload; `None` for tombstones and for placeholders not yet filled
    pub payload: Option<P>,
}

impl<P> SyncItem<P> {
    /// A live version carrying a payload.
    pub fn live(identity: ItemIdentity, stamp: Stamp, payload: P, item_refs: Vec<ItemRef>) -> Self {
        Self {
            identity,
            stamp,
            deleted: false,
            replaced_by: None,
            item_refs,
            payload: Some(payload),
        }
    }

    /// A deletion marker.
    pub fn tombstone(identity: ItemIdentity, stamp: Stamp, replaced_by: Option<ItemIdentity>) -> Self {
        Self {
            identity,
            stamp,
            deleted: true,
            replaced_by,
            item_refs: Vec::new(),
            payload: None,
        }
    }

    /// A referenced item whose payload will be fetched later.
    pub fn placeholder(identity: ItemIdentity, stamp: Stamp) -> Self {
        Self {
            identity,
            stamp,
            deleted: false,
            replaced_by: None,
            item_refs: Vec::new(),
            payload: None,
        }
    }

    /// Current info of this version.
    pub fn info(&self) -> ItemInfo {
        ItemInfo {
            identity: self.identity.clone(),
            stamp: self.stamp.clone(),
            deleted: self.deleted,
            replaced_by: self.replaced_by.clone(),
        }
    }

    /// Whether the item is live but has no payload yet.
    pub fn is_incomplete(&self) -> bool {
        !self.deleted && self.payload.is_none()
    }
}

impl<P: PartialEq> SyncItem<P> {
    /// Same payload and same referenced identities, ignoring stamps.
    pub fn same_content(&self, other: &SyncItem<P>) -> bool {
        self.deleted == other.deleted
            && self.payload == other.payload
            && self.item_refs.len() == other.item_refs.len()
            && self
                .item_refs
                .iter()
                .zip(&other.item_refs)
                .all(|(a, b)| a.identity == b.identity)
    }
}

impl<P: Payload> SyncItem<P> {
    /// Encode into the wire shape.
    pub fn to_wire(&self) -> Result<WireItem> {
        let fields = match &self.payload {
            Some(payload) => payload.to_fields()?,
            None => Fields::new(),
        };

        Ok(WireItem {
            item_type: self.identity.item_type.clone(),
            creation_replica_id: self.identity.created_replica_id.clone(),
            creation_tick_count: self.identity.created_tick_count,
            modification_replica_id: self.stamp.replica_id.clone(),
            modification_tick_count: self.stamp.tick_count,
            deleted: self.deleted,
            replaced_by: self.replaced_by.clone(),
            item_refs: self.item_refs.iter().map(WireRef::from).collect(),
            fields,
        })
    }

    /// Decode from the wire shape, validating the item type.
    pub fn from_wire(wire: WireItem) -> Result<Self> {
        if !P::is_known_type(&wire.item_type) {
            return Err(Error::UnknownItemType(wire.item_type));
        }

        let payload = if wire.deleted {
            None
        } else {
            Some(P::from_fields(&wire.item_type, wire.fields)?)
        };

        Ok(SyncItem {
            identity: ItemIdentity {
                item_type: wire.item_type,
                created_replica_id: wire.creation_replica_id,
                created_tick_count: wire.creation_tick_count,
            },
            stamp: Stamp::new(wire.modification_replica_id, wire.modification_tick_count),
            deleted: wire.deleted,
            replaced_by: wire.replaced_by,
            item_refs: wire.item_refs.into_iter().map(ItemRef::from).collect(),
            payload,
        })
    }
}

/// Wire form of an item reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRef {
    #[serde(rename = "itemType")]
    pub item_type: ItemType,
    #[serde(rename = "creationReplicaID")]
    pub creation_replica_id: ReplicaId,
    #[serde(rename = "creationTickCount")]
    pub creation_tick_count: TickCount,
    #[serde(rename = "modificationReplicaID")]
    pub modification_replica_id: ReplicaId,
    #[serde(rename = "modificationTickCount")]
    pub modification_tick_count: TickCount,
}

impl From<&ItemRef> for WireRef {
    fn from(item_ref: &ItemRef) -> Self {
        Self {
            item_type: item_ref.identity.item_type.clone(),
            creation_replica_id: item_ref.identity.created_replica_id.clone(),
            creation_tick_count: item_ref.identity.created_tick_count,
            modification_replica_id: item_ref.stamp.replica_id.clone(),
            modification_tick_count: item_ref.stamp.tick_count,
        }
    }
}

impl From<WireRef> for ItemRef {
    fn from(wire: WireRef) -> Self {
        ItemRef {
            identity: ItemIdentity {
                item_type: wire.item_type,
                created_replica_id: wire.creation_replica_id,
                created_tick_count: wire.creation_tick_count,
            },
            stamp: Stamp::new(wire.modification_replica_id, wire.modification_tick_count),
        }
    }
}

/// Documented wire shape of an item.
///
/// Type-specific fields are flattened into the same object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireItem {
    #[serde(rename = "itemType")]
    pub item_type: ItemType,
    #[serde(rename = "creationReplicaID")]
    pub creation_replica_id: ReplicaId,
    #[serde(rename = "creationTickCount")]
    pub creation_tick_count: TickCount,
    #[serde(rename = "modificationReplicaID")]
    pub modification_replica_id: ReplicaId,
    #[serde(rename = "modificationTickCount")]
    pub modification_tick_count: TickCount,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(rename = "replacedBy", default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<ItemIdentity>,
    #[serde(rename = "itemRefs", default)]
    pub item_refs: Vec<WireRef>,
    #[serde(flatten)]
    pub fields: Fields,
}

impl WireItem {
    /// Serialized size in bytes, used for batch size caps.
    pub fn encoded_len(&self) -> Result<usize> {
        serde_json::to_vec(self)
            .map(|v| v.len())
            .map_err(|e| Error::InvalidPayload(format!("unencodable item: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Minimal two-type payload used by engine unit tests.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Note {
        Tag { label: String },
        Memo { text: String, tags: Vec<usize> },
    }

    impl Payload for Note {
        fn item_types() -> &'static [&'static str] {
            &["tag", "memo"]
        }

        fn item_type(&self) -> &'static str {
            match self {
                Note::Tag { .. } => "tag",
                Note::Memo { .. } => "memo",
            }
        }

        fn to_fields(&self) -> Result<Fields> {
            match self {
                Note::Tag { label } => encode_fields(&json!({ "label": label })),
                Note::Memo { text, tags } => encode_fields(&json!({ "text": text, "tags": tags })),
            }
        }

        fn from_fields(item_type: &str, fields: Fields) -> Result<Self> {
            let text = |key: &str| {
                fields
                    .get(key)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| Error::InvalidPayload(format!("missing {key}")))
            };
            match item_type {
                "tag" => Ok(Note::Tag {
                    label: text("label")?,
                }),
                "memo" => Ok(Note::Memo {
                    text: text("text")?,
                    tags: fields
                        .get("tags")
                        .and_then(|v| serde_json::from_value(v.clone()).ok())
                        .unwrap_or_default(),
                }),
                other => Err(Error::UnknownItemType(other.to_string())),
            }
        }

        fn duplicate_status(
            &self,
            refs: &[ItemRef],
            other: &Self,
            other_refs: &[ItemRef],
        ) -> DuplicateStatus {
            match (self, other) {
                (Note::Tag { label: a }, Note::Tag { label: b }) if a == b => DuplicateStatus::Exact,
                (Note::Tag { label: a }, Note::Tag { label: b })
                    if a.eq_ignore_ascii_case(b) =>
                {
                    DuplicateStatus::Possible
                }
                (Note::Memo { text: a, tags: ta }, Note::Memo { text: b, tags: tb }) if a == b => {
                    let ids = |tags: &[usize], refs: &[ItemRef]| {
                        tags.iter()
                            .map(|i| refs.get(*i).map(|r| r.identity.clone()))
                            .collect::<Vec<_>>()
                    };
                    if ids(ta, refs) == ids(tb, other_refs) {
                        DuplicateStatus::Exact
                    } else {
                        DuplicateStatus::Possible
                    }
                }
                _ => DuplicateStatus::None,
            }
        }
    }

    pub fn tag(label: &str) -> Note {
        Note::Tag {
            label: label.into(),
        }
    }

    pub fn identity(item_type: &str, replica: &str, tick: u64) -> ItemIdentity {
        ItemIdentity::new(item_type, &Stamp::new(replica, tick))
    }

    #[test]
    fn identity_display() {
        assert_eq!(identity("tag", "a", 3).to_string(), "tag:a@3");
    }

    #[test]
    fn wire_shape_uses_documented_names() {
        let memo = SyncItem::live(
            identity("memo", "a", 2),
            Stamp::new("a", 5),
            Note::Memo {
                text: "hello".into(),
                tags: vec![0],
            },
            vec![ItemRef::new(identity("tag", "a", 1), Stamp::new("a", 1))],
        );

        let json = serde_json::to_value(memo.to_wire().unwrap()).unwrap();
        assert_eq!(json["itemType"], "memo");
        assert_eq!(json["creationReplicaID"], "a");
        assert_eq!(json["creationTickCount"], 2);
        assert_eq!(json["modificationTickCount"], 5);
        assert_eq!(json["text"], "hello");
        assert_eq!(json["tags"], json!([0]));
        assert_eq!(json["itemRefs"][0]["creationTickCount"], 1);
        assert!(json.get("deleted").is_none());
    }

    #[test]
    fn wire_roundtrip_keeps_references_and_tombstones() {
        let tombstone: SyncItem<Note> = SyncItem::tombstone(
            identity("tag", "b", 4),
            Stamp::new("a", 9),
            Some(identity("tag", "a", 1)),
        );
        let wire = serde_json::to_string(&tombstone.to_wire().unwrap()).unwrap();
        let parsed: WireItem = serde_json::from_str(&wire).unwrap();
        let decoded = SyncItem::<Note>::from_wire(parsed).unwrap();

        assert_eq!(decoded, tombstone);
    }

    #[test]
    fn unknown_item_type_is_rejected() {
        let wire: WireItem = serde_json::from_value(json!({
            "itemType": "magazine",
            "creationReplicaID": "a",
            "creationTickCount": 1,
            "modificationReplicaID": "a",
            "modificationTickCount": 1,
            "itemRefs": [],
        }))
        .unwrap();

        let result = SyncItem::<Note>::from_wire(wire);
        assert!(matches!(result, Err(Error::UnknownItemType(t)) if t == "magazine"));
    }

    #[test]
    fn same_content_ignores_stamps() {
        let a = SyncItem::live(identity("tag", "a", 1), Stamp::new("a", 3), tag("x"), vec![]);
        let b = SyncItem::live(identity("tag", "a", 1), Stamp::new("b", 7), tag("x"), vec![]);
        let c = SyncItem::live(identity("tag", "a", 1), Stamp::new("b", 7), tag("y"), vec![]);

        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
    }
}
