//! # Duplex Engine
//!
//! A deterministic, multi-master replication core.
//!
//! Two replicas of a dataset of typed, referenced items exchange changes,
//! fold items created independently on both sides, surface real conflicts
//! and converge to identical state without a central authority.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, clocks or platform
//! - **Deterministic**: same inputs always produce same outputs
//! - **Testable**: pure logic over an in-memory store, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Knowledge
//!
//! A replica records, per replica it has observed, the highest tick count
//! it has seen ([`Knowledge`]). Every local mutation advances the replica's
//! own tick by one and stamps the item with a [`Stamp`]. Knowledge that
//! contains a stamp has already seen that version.
//!
//! ### Items
//!
//! An item is identified by its creation identity ([`ItemIdentity`]) and
//! carries a modification stamp, a payload and references to other items.
//! Deletions leave tombstones. Payloads implement [`Payload`], the per-type
//! codec registry.
//!
//! ### Sessions
//!
//! Incoming items are staged ([`StagingStore`]) with a [`SyncStatus`]
//! derived by [`calculate_sync_status`]. Duplicates are folded
//! ([`detect_duplicates`]), conflicts are surfaced ([`load_conflicts`]) and
//! resolved by the caller, then [`commit_changes`] applies everything in one
//! store transaction. [`SyncHost`] serves the remote half of the protocol.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use duplex_engine::{commit_changes, stage_incoming, Knowledge, MemoryStore, StagingStore};
//!
//! let mut store = MemoryStore::<MyPayload>::new("replica-a");
//! let mut staging = StagingStore::new();
//! staging.begin(remote_knowledge);
//! for item in received {
//!     stage_incoming(&store, &mut staging, item)?;
//! }
//! commit_changes(&mut store, &mut staging)?;
//! ```
//!
//! ## Persistence
//!
//! Use [`MemoryStore::export_state`] and [`MemoryStore::import_state`] with
//! [`StoreSnapshot`]. Snapshots serialize to JSON with deterministic ordering.

pub mod auth;
pub mod error;
pub mod host;
pub mod item;
pub mod knowledge;
pub mod memory;
pub mod protocol;
pub mod reconcile;
pub mod snapshot;
pub mod staging;
pub mod status;
pub mod store;

// Re-export main types at crate root
pub use auth::Credentials;
pub use error::Error;
pub use host::{CallContext, HostConfig, SyncHost};
pub use item::{
    decode_fields, encode_fields, DuplicateStatus, Fields, ItemIdentity, ItemInfo, ItemRef,
    Payload, SyncItem, WireItem, WireRef,
};
pub use knowledge::{Knowledge, Stamp};
pub use memory::{MemoryStore, StoredItem};
pub use protocol::{
    take_batch, BatchLimits, Endpoint, ErrorCode, ErrorResponse, Request, Response,
};
pub use reconcile::{
    detect_duplicates, fill_placeholder, load_conflicts, resolve_local_wins, resolve_merge,
    resolve_remote_wins, stage_incoming, stage_referenced_placeholders, ConflictResolution,
    DuplicateSummary, SyncConflict,
};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use staging::{StagedItem, StagingStore};
pub use status::{calculate_sync_status, SyncStatus};
pub use store::{commit_changes, CommitSummary, Store};

/// Type aliases for clarity
pub type ReplicaId = String;
pub type TickCount = u64;
pub type ItemType = String;
pub type SessionId = String;
pub type Timestamp = u64;
