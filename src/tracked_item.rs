//! Tracked item contract
//!
//! Anything that takes part in versioning exposes an id, a display name,
//! and its current deltas with their payloads. The core only reads
//! tracked items; the domain layer owns and mutates them.
//!
//! Author: Moroya Sakamoto

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::delta::{Delta, DeltaDescription};
use crate::diff_logic::DiffLogic;
use crate::error::{Result, VcsError};
use crate::tree::DataTree;

/// A live or historical object under version control
pub trait TrackedItem {
    fn uuid(&self) -> Uuid;

    fn vcs_name(&self) -> String;

    fn num_deltas(&self) -> usize;

    fn delta(&self, index: usize) -> Option<&Delta>;

    /// Payload for the delta at `index`
    fn serialize_delta_data(&self, index: usize) -> Result<DataTree>;

    /// Diff strategy bound to this item's type
    fn diff_logic(&self) -> Option<Arc<dyn DiffLogic>>;

    /// Index of the delta with this id
    fn find_delta(&self, uuid: Uuid) -> Option<usize> {
        (0..self.num_deltas()).find(|&i| self.delta(i).map(Delta::uuid) == Some(uuid))
    }

    /// Index of the first delta of this kind
    fn find_delta_of_kind(&self, kind: &str) -> Option<usize> {
        (0..self.num_deltas()).find(|&i| self.delta(i).map(Delta::kind) == Some(kind))
    }
}

/// Project-level owner of the tracked items (tracks, info, timeline)
pub trait TrackedItemsSource {
    fn vcs_name(&self) -> String;

    fn num_tracked_items(&self) -> usize;

    fn tracked_item(&self, index: usize) -> Option<&dyn TrackedItem>;
}

/// Owned, free-standing tracked item: deltas plus their payloads
///
/// Produced by diffing, applying and merging, and by materializing a
/// revision. Also usable directly as a simple live item.
#[derive(Clone)]
pub struct ItemState {
    uuid: Uuid,
    name: String,
    logic: Option<Arc<dyn DiffLogic>>,
    deltas: Vec<Delta>,
    data: Vec<DataTree>,
}

impl fmt::Debug for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemState")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("logic", &self.logic.as_ref().map(|l| l.type_tag().to_owned()))
            .field("deltas", &self.deltas)
            .finish()
    }
}

impl ItemState {
    pub fn new(uuid: Uuid, name: &str, logic: Option<Arc<dyn DiffLogic>>) -> Self {
        Self {
            uuid,
            name: String::from(name),
            logic,
            deltas: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Empty state sharing identity and logic with `item`
    pub fn empty_like(item: &dyn TrackedItem) -> Self {
        Self::new(item.uuid(), &item.vcs_name(), item.diff_logic())
    }

    /// Deep copy of any tracked item, payloads included
    pub fn copy_of(item: &dyn TrackedItem) -> Result<Self> {
        let mut state = Self::empty_like(item);
        for i in 0..item.num_deltas() {
            if let Some(delta) = item.delta(i) {
                state.push(delta.create_copy(), item.serialize_delta_data(i)?);
            }
        }
        Ok(state)
    }

    pub fn with_delta(mut self, kind: &str, description: DeltaDescription, data: DataTree) -> Self {
        self.push(Delta::new(kind, description), data);
        self
    }

    pub fn push(&mut self, delta: Delta, data: DataTree) {
        self.deltas.push(delta);
        self.data.push(data);
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = String::from(name);
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    /// Deltas paired with their payloads, in order
    pub fn entries(&self) -> impl Iterator<Item = (&Delta, &DataTree)> {
        self.deltas.iter().zip(self.data.iter())
    }

    pub fn data(&self, index: usize) -> Option<&DataTree> {
        self.data.get(index)
    }

    pub fn data_mut(&mut self, index: usize) -> Option<&mut DataTree> {
        self.data.get_mut(index)
    }

    /// Replace the payload of an existing delta
    pub fn set_data(&mut self, index: usize, data: DataTree) -> Result<()> {
        let len = self.data.len();
        let slot = self
            .data
            .get_mut(index)
            .ok_or(VcsError::DeltaIndexOutOfRange { index, len })?;
        *slot = data;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<(Delta, DataTree)> {
        if index >= self.deltas.len() {
            return None;
        }
        Some((self.deltas.remove(index), self.data.remove(index)))
    }

    /// Payload of the first delta of this kind
    pub fn data_of_kind(&self, kind: &str) -> Option<&DataTree> {
        self.find_delta_of_kind(kind).and_then(|i| self.data.get(i))
    }
}

impl TrackedItem for ItemState {
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
        self.data
            .get(index)
            .cloned()
            .ok_or(VcsError::DeltaIndexOutOfRange {
                index,
                len: self.data.len(),
            })
    }

    fn diff_logic(&self) -> Option<Arc<dyn DiffLogic>> {
        self.logic.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff_logic::DiffLogicRegistry;

    fn track() -> ItemState {
        let logic = DiffLogicRegistry::with_defaults()
            .create_logic_for("PianoTrack")
            .unwrap();
        ItemState::new(Uuid::new_v4(), "Piano", Some(logic))
            .with_delta(
                "name",
                DeltaDescription::new("renamed"),
                DataTree::new("name").with_property("value", "Piano"),
            )
            .with_delta("notes", DeltaDescription::default(), DataTree::new("notes"))
    }

    #[test]
    fn test_item_state_exposes_deltas() {
        let item = track();
        assert_eq!(item.num_deltas(), 2);
        assert_eq!(item.delta(1).unwrap().kind(), "notes");
        assert_eq!(item.find_delta_of_kind("notes"), Some(1));
        assert_eq!(item.find_delta(item.deltas()[0].uuid()), Some(0));
        assert_eq!(item.find_delta(Uuid::new_v4()), None);
        assert_eq!(item.diff_logic().unwrap().type_tag(), "PianoTrack");
    }

    #[test]
    fn test_out_of_range_payload_is_an_error() {
        let item = track();
        assert!(matches!(
            item.serialize_delta_data(5),
            Err(VcsError::DeltaIndexOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn test_copy_of_is_deep_and_keeps_ids() {
        let mut original = track();
        let copy = ItemState::copy_of(&original).unwrap();
        original
            .set_data(0, DataTree::new("name").with_property("value", "Organ"))
            .unwrap();
        assert_eq!(copy.deltas(), original.deltas());
        assert_eq!(
            copy.data(0).unwrap().text_property("value"),
            Some("Piano")
        );
    }

    #[test]
    fn test_remove_keeps_lists_parallel() {
        let mut item = track();
        let (delta, data) = item.remove(0).unwrap();
        assert_eq!(delta.kind(), "name");
        assert!(data.has_name("name"));
        assert_eq!(item.num_deltas(), 1);
        assert!(item.data_of_kind("notes").is_some());
        assert!(item.remove(3).is_none());
    }
}
