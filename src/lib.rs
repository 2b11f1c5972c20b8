//! trackvcs: Structured Document Version Control
//!
//! Don't diff bytes, diff the records.
//!
//! Embedded version control for tree-shaped project state:
//! - Tracked items (tracks, metadata, timelines) expose semantic deltas
//! - Per-type diff/merge strategies, persisted by type tag
//! - Revision items with lazy, deferred payload storage (the pack)
//! - Revision tree with checkpoint, checkout and replay
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`tree`] | Named data tree with typed properties, the common payload format |
//! | [`codec`] | Compact binary tree encoding (LEB128 varints) |
//! | [`delta`] | Delta: stable id, kind tag, human description |
//! | [`pack`] | Payload store keyed by `(item, delta)`, in-memory pack |
//! | [`file_pack`] | On-disk pack with lazy reads and deferred writes |
//! | [`tracked_item`] | Tracked item contract and owned item state |
//! | [`diff_logic`] | Diff strategy trait and type tag registry |
//! | [`diff`] | Built-in slot/collection diff strategy |
//! | [`merge`] | 3-way change merge with conflict detection |
//! | [`revision_item`] | One item frozen in one revision, two-tier payload lookup |
//! | [`revision`] | Revision tree, checkpoint and materialization |
//! | [`gc`] | Garbage collection for unreferenced payloads |
//! | [`error`] | Crate error type |
//!
//! # Feature flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `file-pack` | File-backed pack and history files (default) |
//!
//! # Quick Start
//!
//! ```
//! use trackvcs::{
//!     DataTree, DeltaDescription, DiffLogicRegistry, ItemState, MemoryPack, RevisionGraph,
//!     TrackedItem, TrackedItemsSource,
//! };
//! use uuid::Uuid;
//!
//! struct Project(Vec<ItemState>);
//!
//! impl TrackedItemsSource for Project {
//!     fn vcs_name(&self) -> String {
//!         "demo".into()
//!     }
//!     fn num_tracked_items(&self) -> usize {
//!         self.0.len()
//!     }
//!     fn tracked_item(&self, index: usize) -> Option<&dyn TrackedItem> {
//!         self.0.get(index).map(|item| item as &dyn TrackedItem)
//!     }
//! }
//!
//! let registry = DiffLogicRegistry::with_defaults();
//! let logic = registry.create_logic_for("ProjectInfo").unwrap();
//! let info = ItemState::new(Uuid::new_v4(), "Info", Some(logic)).with_delta(
//!     "title",
//!     DeltaDescription::new("title"),
//!     DataTree::new("title").with_property("value", "Song"),
//! );
//!
//! let mut graph = RevisionGraph::new(MemoryPack::shared());
//! let rev = graph.checkpoint(&Project(vec![info]), "first").unwrap();
//! assert!(rev.is_some());
//!
//! // State at head replays to the live item
//! let states = graph.materialize(graph.head_id()).unwrap();
//! assert_eq!(states[0].vcs_name(), "Info");
//! ```
//!
//! Author: Moroya Sakamoto

pub mod codec;
pub mod delta;
pub mod diff;
pub mod diff_logic;
pub mod error;
#[cfg(feature = "file-pack")]
pub mod file_pack;
pub mod gc;
pub mod merge;
pub mod pack;
pub mod revision;
pub mod revision_item;
pub mod tracked_item;
pub mod tree;

pub use codec::{decode_tree, encode_tree};
pub use delta::{Delta, DeltaDescription};
pub use diff::{change_kind, split_change_kind, ChangeOp, StructuredDiffLogic};
pub use diff_logic::{create_logic_copy, DiffLogic, DiffLogicFactory, DiffLogicRegistry};
pub use error::{Result, VcsError};
#[cfg(feature = "file-pack")]
pub use file_pack::{FilePack, PackConfig};
pub use gc::{collect_garbage, dry_run, GcResult};
pub use merge::{merge_changes, Conflict, MergeResult};
pub use pack::{MemoryPack, Pack, PackKey, PackPtr};
pub use revision::{Revision, RevisionGraph};
pub use revision_item::{RevisionItem, RevisionItemType};
pub use tracked_item::{ItemState, TrackedItem, TrackedItemsSource};
pub use tree::{DataTree, Value};
