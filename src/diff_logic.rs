//! Per-type diff strategies and their registry
//!
//! Every tracked item type has one diff strategy, persisted with its
//! revision items by type tag. Strategies are registered once at startup
//! and shared as keyed singletons.
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::delta::Delta;
use crate::diff::StructuredDiffLogic;
use crate::error::{Result, VcsError};
use crate::merge::{merge_changes, MergeResult};
use crate::tracked_item::{ItemState, TrackedItem};

/// Diff/merge strategy for one tracked item type
pub trait DiffLogic: Send + Sync + fmt::Debug {
    /// Tag persisted alongside revision items
    fn type_tag(&self) -> &str;

    /// Ordered change deltas turning `old` into `new`. Empty when equal.
    fn diff(&self, old: &dyn TrackedItem, new: &dyn TrackedItem) -> Result<ItemState>;

    /// State obtained by applying `changes` on top of `state`
    fn apply(&self, state: &dyn TrackedItem, changes: &dyn TrackedItem) -> Result<ItemState>;

    /// Key under which overlapping changes conflict
    fn conflict_key(&self, delta: &Delta) -> String {
        String::from(delta.kind())
    }

    /// Combine two change sets taken against the same ancestor
    fn merge(&self, ours: &dyn TrackedItem, theirs: &dyn TrackedItem) -> Result<MergeResult> {
        merge_changes(ours, theirs, |delta| self.conflict_key(delta))
    }
}

/// Builds the shared strategy instance for a tag
pub type DiffLogicFactory = fn() -> Arc<dyn DiffLogic>;

/// Type tag → strategy
#[derive(Default)]
pub struct DiffLogicRegistry {
    logics: BTreeMap<String, Arc<dyn DiffLogic>>,
}

impl fmt::Debug for DiffLogicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.logics.keys()).finish()
    }
}

impl DiffLogicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in project strategies
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for &(tag, factory) in StructuredDiffLogic::BUILTIN {
            registry.register(tag, factory);
        }
        registry
    }

    /// Register (or replace) the strategy for `tag`
    pub fn register(&mut self, tag: &str, factory: DiffLogicFactory) {
        let logic = factory();
        if logic.type_tag() != tag {
            log::warn!(
                "diff logic registered as {tag:?} reports type {:?}",
                logic.type_tag()
            );
        }
        if self.logics.insert(String::from(tag), logic).is_some() {
            log::debug!("replaced diff logic for {tag:?}");
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.logics.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        self.logics.keys().map(|s| s.as_str()).collect()
    }

    /// Strategy for a persisted tag
    pub fn create_logic_for(&self, tag: &str) -> Result<Arc<dyn DiffLogic>> {
        match self.logics.get(tag) {
            Some(logic) => Ok(Arc::clone(logic)),
            None => {
                log::error!("no diff logic registered for {tag:?}, history may be corrupt");
                Err(VcsError::UnknownDiffLogic {
                    tag: String::from(tag),
                })
            }
        }
    }
}

/// Same strategy as the live source currently uses
pub fn create_logic_copy(source: &dyn TrackedItem) -> Result<Arc<dyn DiffLogic>> {
    source.diff_logic().ok_or(VcsError::MissingDiffLogic {
        item: source.uuid(),
    })
}
