//! Revision item: one tracked item frozen at one point in history
//!
//! A revision item is either *uncommitted* (copied from a live item,
//! every payload held in memory) or *flushed/deserialized* (payloads
//! live in the pack and are read on demand). Payload lookup is an
//! explicit two-tier search: pending cache first, then the pack.
//!
//! Author: Moroya Sakamoto

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::delta::Delta;
use crate::diff_logic::{create_logic_copy, DiffLogic, DiffLogicRegistry};
use crate::error::{Result, VcsError};
use crate::pack::{PackKey, PackPtr};
use crate::tracked_item::TrackedItem;
use crate::tree::DataTree;

pub(crate) const REVISION_ITEM_NODE: &str = "revisionItem";
const VCS_UUID: &str = "vcsUuid";
const ITEM_TYPE: &str = "revisionItemType";
const ITEM_NAME: &str = "revisionItemName";
const ITEM_DIFF_LOGIC: &str = "revisionItemDiffLogic";

/// What happened to the item in its revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RevisionItemType {
    Added = 0,
    Removed = 1,
    Changed = 2,
    Undefined = 3,
}

impl RevisionItemType {
    pub fn from_i64(v: i64) -> Self {
        match v {
            0 => Self::Added,
            1 => Self::Removed,
            2 => Self::Changed,
            _ => Self::Undefined,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Changed => "changed",
            Self::Undefined => "",
        }
    }
}

pub struct RevisionItem {
    item_type: RevisionItemType,
    uuid: Uuid,
    name: String,
    pack: PackPtr,
    logic: Option<Arc<dyn DiffLogic>>,
    deltas: Vec<Delta>,
    /// Uncommitted payloads, parallel to `deltas`; `None` is a placeholder
    pending: Vec<Option<DataTree>>,
}

impl fmt::Debug for RevisionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisionItem")
            .field("type", &self.item_type)
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("logic", &self.logic.as_ref().map(|l| l.type_tag().to_owned()))
            .field("deltas", &self.deltas)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl RevisionItem {
    /// Uncommitted snapshot of a live item, payloads captured eagerly
    pub fn from_tracked_item(
        pack: PackPtr,
        item_type: RevisionItemType,
        source: &dyn TrackedItem,
    ) -> Result<Self> {
        let logic = create_logic_copy(source)?;
        let count = source.num_deltas();
        let mut deltas = Vec::with_capacity(count);
        let mut pending = Vec::with_capacity(count);
        for i in 0..count {
            let delta = source
                .delta(i)
                .ok_or(VcsError::DeltaIndexOutOfRange { index: i, len: count })?;
            deltas.push(delta.create_copy());
            pending.push(Some(source.serialize_delta_data(i)?));
        }
        Ok(Self {
            item_type,
            uuid: source.uuid(),
            name: source.vcs_name(),
            pack,
            logic: Some(logic),
            deltas,
            pending,
        })
    }

    /// Committed item restored from its persisted form
    pub fn from_tree(pack: PackPtr, tree: &DataTree, registry: &DiffLogicRegistry) -> Result<Self> {
        let mut item = Self::empty(pack);
        item.deserialize(tree, registry)?;
        Ok(item)
    }

    fn empty(pack: PackPtr) -> Self {
        Self {
            item_type: RevisionItemType::Undefined,
            uuid: Uuid::nil(),
            name: String::new(),
            pack,
            logic: None,
            deltas: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn item_type(&self) -> RevisionItemType {
        self.item_type
    }

    pub fn type_as_str(&self) -> &'static str {
        self.item_type.as_str()
    }

    pub fn pack(&self) -> &PackPtr {
        &self.pack
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    /// True once a diff logic is bound (after copy or a good load)
    pub fn is_valid(&self) -> bool {
        self.logic.is_some()
    }

    /// True while any payload is held only in memory
    pub fn has_pending_data(&self) -> bool {
        self.pending.iter().any(Option::is_some)
    }

    /// Push pending payloads into the pack and drop the local copies.
    /// Returns how many payloads were written.
    pub fn flush_data(&mut self) -> usize {
        let mut written = 0;
        for (delta, data) in self.deltas.iter().zip(self.pending.drain(..)) {
            if let Some(data) = data {
                self.pack.set_delta_data_for(self.uuid, delta.uuid(), &data);
                written += 1;
            }
        }
        if written > 0 {
            log::debug!("flushed {written} payloads for {} ({})", self.name, self.uuid);
        }
        written
    }

    /// Take over a payload for one of our deltas, e.g. pulled from a
    /// remote history. Unknown delta ids are ignored.
    pub fn import_data_for_delta(&mut self, data: &DataTree, delta_uuid: Uuid) {
        let Some(index) = self.deltas.iter().position(|d| d.uuid() == delta_uuid) else {
            log::debug!("no delta {delta_uuid} in {}, import skipped", self.uuid);
            return;
        };
        if self.pending.len() <= index {
            self.pending.resize(index + 1, None);
        }
        self.pending[index] = Some(data.clone());
    }

    pub fn serialize(&self) -> DataTree {
        let mut tree = DataTree::new(REVISION_ITEM_NODE)
            .with_property(VCS_UUID, self.uuid)
            .with_property(ITEM_TYPE, self.item_type as i64)
            .with_property(ITEM_NAME, self.name.as_str());
        if let Some(logic) = &self.logic {
            tree.set_property(ITEM_DIFF_LOGIC, logic.type_tag());
        }
        for delta in &self.deltas {
            tree.append_child(delta.serialize());
        }
        tree
    }

    /// Load from a persisted node (or a parent holding one).
    ///
    /// State is reset first, so a failed load leaves an empty, invalid
    /// item rather than a half-populated one.
    pub fn deserialize(&mut self, tree: &DataTree, registry: &DiffLogicRegistry) -> Result<()> {
        self.reset();

        let root = if tree.has_name(REVISION_ITEM_NODE) {
            tree
        } else {
            tree.child_with_name(REVISION_ITEM_NODE)
                .ok_or_else(|| VcsError::UnexpectedNode {
                    expected: String::from(REVISION_ITEM_NODE),
                    found: String::from(tree.name()),
                })?
        };

        let uuid = root.uuid_property(VCS_UUID)?;
        let name = root.text_property(ITEM_NAME).unwrap_or_default();
        let raw_type = root.int_property(ITEM_TYPE);
        let item_type = raw_type.map_or(RevisionItemType::Undefined, RevisionItemType::from_i64);
        if item_type == RevisionItemType::Undefined {
            log::warn!("revision item {uuid} has undefined type ({raw_type:?})");
        }

        let tag = root.require_text(ITEM_DIFF_LOGIC)?;
        let logic = registry.create_logic_for(tag)?;

        let deltas = root
            .children()
            .iter()
            .map(Delta::deserialize)
            .collect::<Result<Vec<_>>>()?;

        self.uuid = uuid;
        self.name = String::from(name);
        self.item_type = item_type;
        self.logic = Some(logic);
        self.deltas = deltas;
        Ok(())
    }

    /// Clear deltas, pending payloads, name, logic and type.
    pub fn reset(&mut self) {
        self.deltas.clear();
        self.pending.clear();
        self.name.clear();
        self.logic = None;
        self.item_type = RevisionItemType::Undefined;
    }
}

impl TrackedItem for RevisionItem {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn vcs_name(&self) -> String {
        self.name.clone()
    }

    fn num_deltas(&self) -> usize {
        self.deltas.len()
    }

    fn delta(&self, index: usize) -> Option<&Delta> {
        self.deltas.get(index)
    }

    fn serialize_delta_data(&self, index: usize) -> Result<DataTree> {
        let delta = self.deltas.get(index).ok_or(VcsError::DeltaIndexOutOfRange {
            index,
            len: self.deltas.len(),
        })?;
        // Uncommitted: the payload is still here
        if let Some(Some(data)) = self.pending.get(index) {
            return Ok(data.clone());
        }
        Ok(self.pack.create_delta_data_for(self.uuid, delta.uuid()))
    }

    fn diff_logic(&self) -> Option<Arc<dyn DiffLogic>> {
        self.logic.clone()
    }
}

/// Pack keys named by a persisted revision item, read without loading it.
/// Children that are not deltas are ignored.
pub(crate) fn referenced_keys(tree: &DataTree) -> Vec<PackKey> {
    let Ok(item) = tree.uuid_property(VCS_UUID) else {
        return Vec::new();
    };
    tree.children()
        .iter()
        .filter_map(|child| Delta::deserialize(child).ok())
        .map(|delta| PackKey::new(item, delta.uuid()))
        .collect()
}
