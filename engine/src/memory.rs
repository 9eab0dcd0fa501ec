//! In-memory store implementing the [`Store`] contract.
//!
//! Holds live items and tombstones keyed by creation identity. Local
//! mutations tick the replica clock exactly once each. Transactions are
//! checkpoints of the whole state, restored on rejection.

use crate::{
    error::Result, Error, ItemIdentity, ItemInfo, ItemRef, Knowledge, Payload, ReplicaId, Stamp,
    Store, SyncItem, TickCount,
};
use std::collections::BTreeMap;

/// A live item or a tombstone as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem<P> {
    pub identity: ItemIdentity,
    pub stamp: Stamp,
    /// `None` marks a tombstone
    pub payload: Option<P>,
    pub refs: Vec<ItemRef>,
    pub replaced_by: Option<ItemIdentity>,
}

impl<P> StoredItem<P> {
    /// Check if item is live (not a tombstone).
    pub fn is_live(&self) -> bool {
        self.payload.is_some()
    }

    pub(crate) fn info(&self) -> ItemInfo {
        ItemInfo {
            identity: self.identity.clone(),
            stamp: self.stamp.clone(),
            deleted: !self.is_live(),
            replaced_by: self.replaced_by.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct State<P> {
    tick: TickCount,
    knowledge: Knowledge,
    items: BTreeMap<ItemIdentity, StoredItem<P>>,
}

/// The in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore<P> {
    replica_id: ReplicaId,
    state: State<P>,
    checkpoint: Option<State<P>>,
}

impl<P: Payload> MemoryStore<P> {
    /// Create an empty store for a replica.
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self {
            replica_id: replica_id.into(),
            state: State {
                tick: 0,
                knowledge: Knowledge::new(),
                items: BTreeMap::new(),
            },
            checkpoint: None,
        }
    }

    /// Current tick count of the local replica.
    pub fn tick_count(&self) -> TickCount {
        self.state.tick
    }

    fn next_stamp(&mut self) -> Stamp {
        self.state.tick += 1;
        Stamp::new(self.replica_id.clone(), self.state.tick)
    }

    /// Create a new item locally.
    pub fn create(&mut self, payload: P, refs: Vec<ItemIdentity>) -> Result<ItemIdentity> {
        let refs = self.current_refs(refs)?;
        let stamp = self.next_stamp();
        let identity = ItemIdentity::new(payload.item_type(), &stamp);

        self.state.items.insert(
            identity.clone(),
            StoredItem {
                identity: identity.clone(),
                stamp,
                payload: Some(payload),
                refs,
                replaced_by: None,
            },
        );
        Ok(identity)
    }

    /// Replace the payload and references of a live item locally.
    pub fn update(
        &mut self,
        identity: &ItemIdentity,
        payload: P,
        refs: Vec<ItemIdentity>,
    ) -> Result<Stamp> {
        if payload.item_type() != identity.item_type {
            return Err(Error::InvalidPayload(format!(
                "{} payload for {} item",
                payload.item_type(),
                identity.item_type
            )));
        }
        self.get(identity)
            .ok_or_else(|| Error::ItemNotFound(identity.to_string()))?;

        let refs = self.current_refs(refs)?;
        let stamp = self.next_stamp();
        if let Some(item) = self.state.items.get_mut(identity) {
            item.stamp = stamp.clone();
            item.payload = Some(payload);
            item.refs = refs;
        }
        Ok(stamp)
    }

    /// Replace a live item with a tombstone locally.
    pub fn delete(&mut self, identity: &ItemIdentity) -> Result<Stamp> {
        self.get(identity)
            .ok_or_else(|| Error::ItemNotFound(identity.to_string()))?;

        let stamp = self.next_stamp();
        if let Some(item) = self.state.items.get_mut(identity) {
            item.stamp = stamp.clone();
            item.payload = None;
            item.refs.clear();
        }
        Ok(stamp)
    }

    fn current_refs(&self, refs: Vec<ItemIdentity>) -> Result<Vec<ItemRef>> {
        refs.into_iter()
            .map(|identity| -> Result<ItemRef> {
                let identity = self.resolve(&identity);
                let item = self
                    .get(&identity)
                    .ok_or_else(|| Error::ItemNotFound(identity.to_string()))?;
                Ok(ItemRef::new(identity, item.stamp.clone()))
            })
            .collect()
    }

    /// Get a live item.
    pub fn get(&self, identity: &ItemIdentity) -> Option<&StoredItem<P>> {
        self.state.items.get(identity).filter(|i| i.is_live())
    }

    /// Get a tombstone.
    pub fn tombstone(&self, identity: &ItemIdentity) -> Option<&StoredItem<P>> {
        self.state.items.get(identity).filter(|i| !i.is_live())
    }

    /// All live items in identity order.
    pub fn live_items(&self) -> impl Iterator<Item = &StoredItem<P>> {
        self.state.items.values().filter(|i| i.is_live())
    }

    /// Live items of one type.
    pub fn live_of_type<'a>(&'a self, item_type: &'a str) -> impl Iterator<Item = &'a StoredItem<P>> {
        self.live_items()
            .filter(move |i| i.identity.item_type == item_type)
    }

    /// All items including tombstones in identity order.
    pub fn all_items(&self) -> impl Iterator<Item = &StoredItem<P>> {
        self.state.items.values()
    }

    /// Follow duplicate-folding replacements to the surviving identity.
    pub fn resolve(&self, identity: &ItemIdentity) -> ItemIdentity {
        let mut current = identity.clone();
        let mut hops = 0;
        while let Some(next) = self
            .state
            .items
            .get(&current)
            .and_then(|item| item.replaced_by.clone())
        {
            hops += 1;
            if hops > self.state.items.len() {
                break;
            }
            current = next;
        }
        current
    }

    fn type_rank(item_type: &str) -> usize {
        P::item_types()
            .iter()
            .position(|t| *t == item_type)
            .unwrap_or(usize::MAX)
    }

    pub(crate) fn restore(
        &mut self,
        tick: TickCount,
        knowledge: Knowledge,
        items: Vec<SyncItem<P>>,
    ) {
        self.state = State {
            tick,
            knowledge,
            items: items
                .into_iter()
                .map(|item| {
                    (
                        item.identity.clone(),
                        StoredItem {
                            identity: item.identity,
                            stamp: item.stamp,
                            payload: item.payload,
                            refs: item.item_refs,
                            replaced_by: item.replaced_by,
                        },
                    )
                })
                .collect(),
        };
        self.checkpoint = None;
    }
}

impl<P: Payload> Store for MemoryStore<P> {
    type Payload = P;

    fn replica_id(&self) -> &str {
        &self.replica_id
    }

    fn generate_local_knowledge(&self) -> Result<Knowledge> {
        let mut knowledge = self.state.knowledge.clone();
        knowledge.observe(&Stamp::new(self.replica_id.clone(), self.state.tick));
        Ok(knowledge)
    }

    fn locate_changed_items(&self, remote_knowledge: &Knowledge) -> Result<Vec<ItemInfo>> {
        let mut changed: Vec<ItemInfo> = self
            .state
            .items
            .values()
            .filter(|item| !remote_knowledge.contains(&item.stamp))
            .map(StoredItem::info)
            .collect();
        changed.sort_by(|a, b| {
            Self::type_rank(&a.identity.item_type)
                .cmp(&Self::type_rank(&b.identity.item_type))
                .then_with(|| a.identity.cmp(&b.identity))
        });
        Ok(changed)
    }

    fn locate_current_item_info(&self, identity: &ItemIdentity) -> Result<Option<ItemInfo>> {
        Ok(self.state.items.get(identity).map(StoredItem::info))
    }

    fn build_item_data(&self, info: &ItemInfo) -> Result<SyncItem<P>> {
        let item = self
            .state
            .items
            .get(&info.identity)
            .ok_or_else(|| Error::ItemNotFound(info.identity.to_string()))?;

        let item_refs = item
            .refs
            .iter()
            .map(|item_ref| {
                let identity = self.resolve(&item_ref.identity);
                let stamp = self
                    .state
                    .items
                    .get(&identity)
                    .map(|target| target.stamp.clone())
                    .unwrap_or_else(|| item_ref.stamp.clone());
                ItemRef::new(identity, stamp)
            })
            .collect();

        Ok(SyncItem {
            identity: item.identity.clone(),
            stamp: item.stamp.clone(),
            deleted: !item.is_live(),
            replaced_by: item.replaced_by.clone(),
            item_refs,
            payload: item.payload.clone(),
        })
    }

    fn begin_changes(&mut self) -> Result<()> {
        if self.checkpoint.is_some() {
            return Err(Error::Store("transaction already open".into()));
        }
        self.checkpoint = Some(self.state.clone());
        Ok(())
    }

    fn save_item_data(&mut self, item: &SyncItem<P>) -> Result<()> {
        let payload = item
            .payload
            .clone()
            .ok_or_else(|| Error::IncompletePayload(item.identity.to_string()))?;

        self.state.items.insert(
            item.identity.clone(),
            StoredItem {
                identity: item.identity.clone(),
                stamp: item.stamp.clone(),
                payload: Some(payload),
                refs: item.item_refs.clone(),
                replaced_by: None,
            },
        );
        Ok(())
    }

    fn delete_item(
        &mut self,
        identity: &ItemIdentity,
        stamp: &Stamp,
        replaced_by: Option<&ItemIdentity>,
    ) -> Result<()> {
        self.state.items.insert(
            identity.clone(),
            StoredItem {
                identity: identity.clone(),
                stamp: stamp.clone(),
                payload: None,
                refs: Vec::new(),
                replaced_by: replaced_by.cloned(),
            },
        );

        if let Some(survivor) = replaced_by {
            let stamp = self
                .state
                .items
                .get(survivor)
                .map(|s| s.stamp.clone())
                .unwrap_or_else(|| survivor.creation_stamp());
            for item in self.state.items.values_mut().filter(|i| i.is_live()) {
                for item_ref in item.refs.iter_mut() {
                    if &item_ref.identity == identity {
                        *item_ref = ItemRef::new(survivor.clone(), stamp.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn update_local_knowledge(&mut self, remote_knowledge: &Knowledge) -> Result<()> {
        self.state.knowledge.merge(remote_knowledge);
        if let Some(own) = self.state.knowledge.get(&self.replica_id) {
            self.state.tick = self.state.tick.max(own);
        }
        Ok(())
    }

    fn accept_changes(&mut self) -> Result<()> {
        self.checkpoint
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::Store("no open transaction".into()))
    }

    fn reject_changes(&mut self) -> Result<()> {
        let checkpoint = self
            .checkpoint
            .take()
            .ok_or_else(|| Error::Store("no open transaction".into()))?;
        self.state = checkpoint;
        Ok(())
    }

    fn increment_local_tick_count(&mut self) -> Result<Stamp> {
        Ok(self.next_stamp())
    }
}
