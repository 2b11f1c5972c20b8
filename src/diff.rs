//! Structured diff engine
//!
//! Built-in diff strategy for slot-based tracked items. An item's state
//! is a list of slots: one delta per slot, kind = slot name, payload =
//! slot contents. Collection slots hold children keyed by an `id`
//! property (notes, automation events, signatures) and are diffed child
//! by child; every other slot is compared as a whole.
//!
//! Change deltas are named `<slot>:<op>`:
//! - `set` / `unset`: whole slot written or removed
//! - `added` / `removed` / `changed`: collection children, payload is a
//!   slot node holding just those children
//! - `ordered`: collection children reordered, payload lists child keys
//!
//! A collection edit that cannot be replayed child by child (duplicate
//! keys) is recorded as a `set` of the whole slot.
//!
//! Author: Moroya Sakamoto

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::delta::{Delta, DeltaDescription};
use crate::diff_logic::{DiffLogic, DiffLogicFactory};
use crate::error::Result;
use crate::tracked_item::{ItemState, TrackedItem};
use crate::tree::{DataTree, Value};

const CHANGE_SEPARATOR: char = ':';
const ID_PROPERTY: &str = "id";
const ORDER_NODE: &str = "key";

/// Operation encoded in a change delta's kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Set,
    Unset,
    Added,
    Removed,
    Changed,
    Ordered,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOp::Set => "set",
            ChangeOp::Unset => "unset",
            ChangeOp::Added => "added",
            ChangeOp::Removed => "removed",
            ChangeOp::Changed => "changed",
            ChangeOp::Ordered => "ordered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "set" => Some(ChangeOp::Set),
            "unset" => Some(ChangeOp::Unset),
            "added" => Some(ChangeOp::Added),
            "removed" => Some(ChangeOp::Removed),
            "changed" => Some(ChangeOp::Changed),
            "ordered" => Some(ChangeOp::Ordered),
            _ => None,
        }
    }
}

/// `notes` + `Added` → `notes:added`
pub fn change_kind(slot: &str, op: ChangeOp) -> String {
    format!("{slot}{CHANGE_SEPARATOR}{}", op.as_str())
}

/// Inverse of [`change_kind`]
pub fn split_change_kind(kind: &str) -> Option<(&str, ChangeOp)> {
    let (slot, op) = kind.rsplit_once(CHANGE_SEPARATOR)?;
    Some((slot, ChangeOp::parse(op)?))
}

/// Identity of a collection child: its `id`, else its content
fn child_key(child: &DataTree) -> String {
    match child.property(ID_PROPERTY) {
        Some(Value::Text(s)) => s.clone(),
        Some(Value::Int(n)) => n.to_string(),
        _ => format!("#{:016x}", child.content_hash()),
    }
}

fn same_slot_header(a: &DataTree, b: &DataTree) -> bool {
    a.name() == b.name() && a.properties().eq(b.properties())
}

/// Slot-based strategy, optionally with collection slots
#[derive(Debug, Clone, Copy)]
pub struct StructuredDiffLogic {
    type_tag: &'static str,
    collections: &'static [&'static str],
}

impl StructuredDiffLogic {
    pub const PROJECT_INFO: &'static str = "ProjectInfo";
    pub const PROJECT_TIMELINE: &'static str = "ProjectTimeline";
    pub const PIANO_TRACK: &'static str = "PianoTrack";
    pub const AUTOMATION_TRACK: &'static str = "AutomationTrack";

    /// Strategies registered by
    /// [`DiffLogicRegistry::with_defaults`](crate::DiffLogicRegistry::with_defaults)
    pub const BUILTIN: &'static [(&'static str, DiffLogicFactory)] = &[
        (Self::PROJECT_INFO, project_info),
        (Self::PROJECT_TIMELINE, project_timeline),
        (Self::PIANO_TRACK, piano_track),
        (Self::AUTOMATION_TRACK, automation_track),
    ];

    pub const fn new(type_tag: &'static str, collections: &'static [&'static str]) -> Self {
        Self {
            type_tag,
            collections,
        }
    }

    pub fn is_collection(&self, slot: &str) -> bool {
        self.collections.contains(&slot)
    }

    fn push_change(
        changes: &mut ItemState,
        slot: &str,
        op: ChangeOp,
        count: Option<usize>,
        data: DataTree,
    ) {
        let text = format!("{slot} {}", op.as_str());
        let description = match count {
            Some(n) => DeltaDescription::with_count(&text, n as i64),
            None => DeltaDescription::new(&text),
        };
        changes.push(Delta::new(&change_kind(slot, op), description), data);
    }

    fn diff_collection(
        &self,
        slot: &str,
        old: &DataTree,
        new: &DataTree,
        changes: &mut ItemState,
    ) {
        // Map old child keys → index for O(1) matching
        let old_index: HashMap<String, usize> = old
            .children()
            .iter()
            .enumerate()
            .map(|(i, c)| (child_key(c), i))
            .collect();

        let mut added = DataTree::new(slot);
        let mut changed = DataTree::new(slot);
        let mut new_keys = HashSet::with_capacity(new.num_children());

        for child in new.children() {
            let key = child_key(child);
            match old_index.get(&key) {
                None => added.append_child(child.clone()),
                Some(&oi) if old.children()[oi] != *child => changed.append_child(child.clone()),
                Some(_) => {}
            }
            new_keys.insert(key);
        }

        let mut removed = DataTree::new(slot);
        for child in old.children() {
            if !new_keys.contains(&child_key(child)) {
                removed.append_child(child.clone());
            }
        }

        let mut ops: Vec<(ChangeOp, DataTree)> = [
            (ChangeOp::Added, added),
            (ChangeOp::Removed, removed),
            (ChangeOp::Changed, changed),
        ]
        .into_iter()
        .filter(|(_, data)| data.num_children() > 0)
        .collect();

        // Replay must land exactly on `new`, child order included
        let mut replay = old.clone();
        for (op, data) in &ops {
            Self::apply_collection(&mut replay, *op, data);
        }
        if replay != *new {
            let order = new.children().iter().fold(DataTree::new(slot), |order, child| {
                let entry = DataTree::new(ORDER_NODE).with_property(ID_PROPERTY, child_key(child));
                order.with_child(entry)
            });
            Self::apply_collection(&mut replay, ChangeOp::Ordered, &order);
            if replay != *new {
                Self::push_change(changes, slot, ChangeOp::Set, None, new.clone());
                return;
            }
            ops.push((ChangeOp::Ordered, order));
        }

        for (op, data) in ops {
            Self::push_change(changes, slot, op, Some(data.num_children()), data);
        }
    }

    /// Move children into the listed key order; unlisted ones go last
    fn reorder_children(target: &mut DataTree, order: &DataTree) {
        let mut rest = target.take_children();
        for key in order.children().iter().filter_map(|k| k.text_property(ID_PROPERTY)) {
            if let Some(pos) = rest.iter().position(|c| child_key(c) == key) {
                target.append_child(rest.remove(pos));
            }
        }
        for child in rest {
            target.append_child(child);
        }
    }

    fn apply_collection(target: &mut DataTree, op: ChangeOp, data: &DataTree) {
        if op == ChangeOp::Ordered {
            Self::reorder_children(target, data);
            return;
        }
        for child in data.children() {
            let key = child_key(child);
            match op {
                ChangeOp::Removed => {
                    target.remove_children_where(|c| child_key(c) == key);
                }
                _ => {
                    target.replace_child_where(child.clone(), |c| child_key(c) == key);
                }
            }
        }
    }
}

impl DiffLogic for StructuredDiffLogic {
    fn type_tag(&self) -> &str {
        self.type_tag
    }

    fn diff(&self, old: &dyn TrackedItem, new: &dyn TrackedItem) -> Result<ItemState> {
        let old = ItemState::copy_of(old)?;
        let new_state = ItemState::copy_of(new)?;
        let mut changes = ItemState::empty_like(new);

        for (delta, new_data) in new_state.entries() {
            let slot = delta.kind();
            match old.data_of_kind(slot) {
                Some(old_data)
                    if self.is_collection(slot) && same_slot_header(old_data, new_data) =>
                {
                    self.diff_collection(slot, old_data, new_data, &mut changes);
                }
                Some(old_data) if old_data == new_data => {}
                _ => Self::push_change(&mut changes, slot, ChangeOp::Set, None, new_data.clone()),
            }
        }

        for (delta, old_data) in old.entries() {
            if new_state.find_delta_of_kind(delta.kind()).is_none() {
                Self::push_change(
                    &mut changes,
                    delta.kind(),
                    ChangeOp::Unset,
                    None,
                    old_data.clone(),
                );
            }
        }

        Ok(changes)
    }

    fn apply(&self, state: &dyn TrackedItem, changes: &dyn TrackedItem) -> Result<ItemState> {
        let mut result = ItemState::copy_of(state)?;
        result.set_name(&changes.vcs_name());

        for i in 0..changes.num_deltas() {
            let Some(delta) = changes.delta(i) else {
                continue;
            };
            let Some((slot, op)) = split_change_kind(delta.kind()) else {
                log::warn!("{}: skipping unknown change {:?}", self.type_tag, delta.kind());
                continue;
            };
            let data = changes.serialize_delta_data(i)?;
            if !data.is_valid() {
                log::warn!("{}: no payload for change {}", self.type_tag, delta.uuid());
                continue;
            }
            let existing = result.find_delta_of_kind(slot);
            let slot_delta = || Delta::with_uuid(delta.uuid(), slot, DeltaDescription::default());

            match (op, existing) {
                (ChangeOp::Set, Some(idx)) => result.set_data(idx, data)?,
                (ChangeOp::Set, None) => result.push(slot_delta(), data),
                (ChangeOp::Unset, Some(idx)) => {
                    result.remove(idx);
                }
                (ChangeOp::Unset, None) | (ChangeOp::Removed, None) => {}
                (op, Some(idx)) => {
                    if let Some(target) = result.data_mut(idx) {
                        Self::apply_collection(target, op, &data);
                    }
                }
                (op, None) => {
                    let mut target = DataTree::new(slot);
                    Self::apply_collection(&mut target, op, &data);
                    result.push(slot_delta(), target);
                }
            }
        }

        Ok(result)
    }

    fn conflict_key(&self, delta: &Delta) -> String {
        match split_change_kind(delta.kind()) {
            Some((slot, _)) => String::from(slot),
            None => String::from(delta.kind()),
        }
    }
}

fn project_info() -> Arc<dyn DiffLogic> {
    Arc::new(StructuredDiffLogic::new(StructuredDiffLogic::PROJECT_INFO, &[]))
}

fn project_timeline() -> Arc<dyn DiffLogic> {
    Arc::new(StructuredDiffLogic::new(
        StructuredDiffLogic::PROJECT_TIMELINE,
        &["annotations", "keySignatures", "timeSignatures"],
    ))
}

fn piano_track() -> Arc<dyn DiffLogic> {
    Arc::new(StructuredDiffLogic::new(StructuredDiffLogic::PIANO_TRACK, &["notes"]))
}

fn automation_track() -> Arc<dyn DiffLogic> {
    Arc::new(StructuredDiffLogic::new(
        StructuredDiffLogic::AUTOMATION_TRACK,
        &["events"],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn note(id: &str, key: i64) -> DataTree {
        DataTree::new("note")
            .with_property("id", id)
            .with_property("key", key)
    }

    fn notes(items: &[(&str, i64)]) -> DataTree {
        items
            .iter()
            .fold(DataTree::new("notes"), |t, (id, key)| t.with_child(note(id, *key)))
    }

    fn name(value: &str) -> DataTree {
        DataTree::new("name").with_property("value", value)
    }

    fn track(uuid: Uuid, track_name: &str, notes_tree: DataTree) -> ItemState {
        ItemState::new(uuid, "Piano", Some(piano_track()))
            .with_delta("name", DeltaDescription::default(), name(track_name))
            .with_delta("notes", DeltaDescription::default(), notes_tree)
    }

    fn kinds(state: &ItemState) -> Vec<&str> {
        state.deltas().iter().map(Delta::kind).collect()
    }

    #[test]
    fn test_change_kind_roundtrip() {
        assert_eq!(change_kind("notes", ChangeOp::Added), "notes:added");
        assert_eq!(split_change_kind("notes:added"), Some(("notes", ChangeOp::Added)));
        assert_eq!(split_change_kind("notes"), None);
        assert_eq!(split_change_kind("notes:shuffled"), None);
    }

    #[test]
    fn test_no_diff_identical_states() {
        let id = Uuid::new_v4();
        let a = track(id, "Lead", notes(&[("n1", 60)]));
        let b = track(id, "Lead", notes(&[("n1", 60)]));
        assert!(piano_track().diff(&a, &b).unwrap().is_empty());
    }

    #[test]
    fn test_diff_property_change() {
        let id = Uuid::new_v4();
        let a = track(id, "Lead", notes(&[]));
        let b = track(id, "Bass", notes(&[]));
        let changes = piano_track().diff(&a, &b).unwrap();
        assert_eq!(kinds(&changes), vec!["name:set"]);
        assert_eq!(changes.data(0), Some(&name("Bass")));
    }

    #[test]
    fn test_diff_collection_children() {
        let id = Uuid::new_v4();
        let a = track(id, "Lead", notes(&[("n1", 60), ("n2", 62), ("n3", 64)]));
        let b = track(id, "Lead", notes(&[("n1", 60), ("n2", 63), ("n4", 67)]));
        let changes = piano_track().diff(&a, &b).unwrap();
        assert_eq!(kinds(&changes), vec!["notes:added", "notes:removed", "notes:changed"]);
        assert_eq!(changes.data(0).unwrap().children()[0], note("n4", 67));
        assert_eq!(changes.data(1).unwrap().children()[0], note("n3", 64));
        assert_eq!(changes.data(2).unwrap().children()[0], note("n2", 63));
        assert_eq!(changes.deltas()[0].description().int_param, Some(1));
    }

    #[test]
    fn test_diff_against_empty_sets_every_slot() {
        let item = track(Uuid::new_v4(), "Lead", notes(&[("n1", 60)]));
        let changes = piano_track().diff(&ItemState::empty_like(&item), &item).unwrap();
        assert_eq!(kinds(&changes), vec!["name:set", "notes:set"]);
    }

    #[test]
    fn test_diff_removed_slot() {
        let id = Uuid::new_v4();
        let a = track(id, "Lead", notes(&[]));
        let b = ItemState::new(id, "Piano", Some(piano_track()))
            .with_delta("notes", DeltaDescription::default(), notes(&[]));
        let changes = piano_track().diff(&a, &b).unwrap();
        assert_eq!(kinds(&changes), vec!["name:unset"]);
        assert_eq!(changes.data(0), Some(&name("Lead")));
    }

    #[test]
    fn test_collection_header_change_sets_whole_slot() {
        let id = Uuid::new_v4();
        let a = track(id, "Lead", notes(&[("n1", 60)]));
        let b = track(id, "Lead", notes(&[("n1", 60)]).with_property("colour", "#fff"));
        let changes = piano_track().diff(&a, &b).unwrap();
        assert_eq!(kinds(&changes), vec!["notes:set"]);
    }

    #[test]
    fn test_apply_reproduces_new_state() {
        let logic = piano_track();
        let id = Uuid::new_v4();
        let a = track(id, "Lead", notes(&[("n1", 60), ("n2", 62), ("n3", 64)]));
        let b = track(id, "Bass", notes(&[("n1", 60), ("n2", 63), ("n4", 67)]));
        let changes = logic.diff(&a, &b).unwrap();
        let applied = logic.apply(&a, &changes).unwrap();
        assert!(logic.diff(&applied, &b).unwrap().is_empty());
        assert_eq!(applied.data_of_kind("name"), Some(&name("Bass")));
    }

    #[test]
    fn test_apply_from_empty_materializes_item() {
        let logic = piano_track();
        let item = track(Uuid::new_v4(), "Lead", notes(&[("n1", 60)]));
        let empty = ItemState::empty_like(&item);
        let changes = logic.diff(&empty, &item).unwrap();
        let applied = logic.apply(&empty, &changes).unwrap();
        assert_eq!(applied.uuid(), item.uuid());
        assert!(logic.diff(&applied, &item).unwrap().is_empty());
    }

    #[test]
    fn test_apply_unset_and_unknown() {
        let logic = piano_track();
        let id = Uuid::new_v4();
        let a = track(id, "Lead", notes(&[]));
        let changes = ItemState::new(id, "Piano", Some(piano_track()))
            .with_delta("name:unset", DeltaDescription::default(), name("Lead"))
            .with_delta("mystery", DeltaDescription::default(), DataTree::new("x"));
        let applied = logic.apply(&a, &changes).unwrap();
        assert_eq!(kinds(&applied), vec!["notes"]);
    }

    #[test]
    fn test_children_without_id_match_by_content() {
        let logic = automation_track();
        let id = Uuid::new_v4();
        let ev = |beat: i64| DataTree::new("event").with_property("beat", beat);
        let a = ItemState::new(id, "Auto", Some(automation_track())).with_delta(
            "events",
            DeltaDescription::default(),
            DataTree::new("events").with_child(ev(0)).with_child(ev(4)),
        );
        let b = ItemState::new(id, "Auto", Some(automation_track())).with_delta(
            "events",
            DeltaDescription::default(),
            DataTree::new("events").with_child(ev(0)).with_child(ev(8)),
        );
        let changes = logic.diff(&a, &b).unwrap();
        assert_eq!(kinds(&changes), vec!["events:added", "events:removed"]);
    }

    #[test]
    fn test_diff_is_deterministic() {
        let logic = project_timeline();
        let id = Uuid::new_v4();
        let sig = |id: &str, beat: i64| {
            DataTree::new("timeSignature")
                .with_property("id", id)
                .with_property("beat", beat)
        };
        let make = |sigs: Vec<DataTree>| {
            ItemState::new(id, "Timeline", Some(project_timeline())).with_delta(
                "timeSignatures",
                DeltaDescription::default(),
                sigs.into_iter().fold(DataTree::new("timeSignatures"), DataTree::with_child),
            )
        };
        let a = make(vec![sig("s1", 0), sig("s2", 16)]);
        let b = make(vec![sig("s1", 0), sig("s3", 32)]);
        let first = logic.diff(&a, &b).unwrap();
        let second = logic.diff(&a, &b).unwrap();
        assert_eq!(kinds(&first), kinds(&second));
        for i in 0..first.num_deltas() {
            assert_eq!(first.data(i), second.data(i));
        }
    }

    fn events(beats: &[i64]) -> ItemState {
        let tree = beats.iter().fold(DataTree::new("events"), |t, &beat| {
            t.with_child(DataTree::new("event").with_property("beat", beat))
        });
        ItemState::new(Uuid::nil(), "Auto", Some(automation_track())).with_delta(
            "events",
            DeltaDescription::default(),
            tree,
        )
    }

    /// `apply(old, diff(old, new))` lands exactly on `new`
    fn assert_exact_replay(logic: &dyn DiffLogic, old: &ItemState, new: &ItemState) -> ItemState {
        let changes = logic.diff(old, new).unwrap();
        let applied = logic.apply(old, &changes).unwrap();
        for (delta, data) in new.entries() {
            assert_eq!(applied.data_of_kind(delta.kind()), Some(data), "slot {}", delta.kind());
        }
        assert_eq!(applied.num_deltas(), new.num_deltas());
        changes
    }

    #[test]
    fn test_reorder_is_a_change() {
        let logic = automation_track();
        let changes = assert_exact_replay(logic.as_ref(), &events(&[0, 4]), &events(&[4, 0]));
        assert_eq!(kinds(&changes), vec!["events:ordered"]);
    }

    #[test]
    fn test_reorder_with_edits() {
        let logic = piano_track();
        let id = Uuid::new_v4();
        let a = track(id, "Lead", notes(&[("n1", 60), ("n2", 62), ("n3", 64)]));
        let b = track(id, "Lead", notes(&[("n4", 67), ("n3", 65), ("n1", 60)]));
        let changes = assert_exact_replay(logic.as_ref(), &a, &b);
        assert_eq!(
            kinds(&changes),
            vec!["notes:added", "notes:removed", "notes:changed", "notes:ordered"]
        );
    }

    #[test]
    fn test_duplicate_children_fall_back_to_set() {
        let logic = automation_track();
        let changes = assert_exact_replay(logic.as_ref(), &events(&[0, 0]), &events(&[0]));
        assert_eq!(kinds(&changes), vec!["events:set"]);
        let changes = assert_exact_replay(logic.as_ref(), &events(&[0]), &events(&[0, 0]));
        assert_eq!(kinds(&changes), vec!["events:set"]);
        assert_exact_replay(logic.as_ref(), &events(&[0, 4, 0]), &events(&[4, 0, 0]));
    }

    #[test]
    fn test_insert_in_the_middle_replays_exactly() {
        let logic = automation_track();
        let changes = assert_exact_replay(logic.as_ref(), &events(&[0, 8]), &events(&[0, 4, 8]));
        assert_eq!(kinds(&changes), vec!["events:added", "events:ordered"]);
    }

    #[test]
    fn test_conflict_key_is_slot() {
        let logic = piano_track();
        let d = Delta::new("notes:added", DeltaDescription::default());
        assert_eq!(logic.conflict_key(&d), "notes");
        let plain = Delta::new("notes", DeltaDescription::default());
        assert_eq!(logic.conflict_key(&plain), "notes");
    }
}
