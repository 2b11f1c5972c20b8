//! 3-way change merge
//!
//! Merges two change sets taken against a common ancestor. Changes
//! under different conflict keys merge cleanly; changes under the same
//! key merge only when both sides did the same thing.
//!
//! Author: Moroya Sakamoto

use crate::delta::Delta;
use crate::error::Result;
use crate::tracked_item::{ItemState, TrackedItem};
use crate::tree::DataTree;

/// Merge conflict
#[derive(Debug, Clone)]
pub struct Conflict {
    /// Conflict key shared by both sides (a slot for built-in logic)
    pub key: String,
    /// Description of the conflict
    pub description: String,
    /// Changes from our side
    pub ours: Vec<(Delta, DataTree)>,
    /// Changes from their side
    pub theirs: Vec<(Delta, DataTree)>,
}

/// Merge result
#[derive(Debug)]
pub struct MergeResult {
    /// Successfully merged changes
    pub merged: ItemState,
    /// Conflicts that need manual resolution
    pub conflicts: Vec<Conflict>,
}

impl MergeResult {
    /// True if merge is clean (no conflicts)
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Merge change sets from two sides
///
/// The merged set keeps `ours`' identity. Non-overlapping changes from
/// both sides are combined, ours first.
pub fn merge_changes(
    ours: &dyn TrackedItem,
    theirs: &dyn TrackedItem,
    key_of: impl Fn(&Delta) -> String,
) -> Result<MergeResult> {
    let ours = ItemState::copy_of(ours)?;
    let theirs = ItemState::copy_of(theirs)?;

    let affected_ours = affected_keys(&ours, &key_of);
    let affected_theirs = affected_keys(&theirs, &key_of);

    let mut merged = ItemState::empty_like(&ours);
    let mut conflicts = Vec::new();

    for (delta, data) in ours.entries() {
        if !affected_theirs.contains(&key_of(delta)) {
            merged.push(delta.create_copy(), data.clone());
        }
    }

    for (delta, data) in theirs.entries() {
        if !affected_ours.contains(&key_of(delta)) {
            merged.push(delta.create_copy(), data.clone());
        }
    }

    for key in &affected_ours {
        if !affected_theirs.contains(key) {
            continue;
        }
        let ops_ours = changes_under(&ours, key, &key_of);
        let ops_theirs = changes_under(&theirs, key, &key_of);

        // Both sides did the same thing: auto-resolve
        if same_changes(&ops_ours, &ops_theirs) {
            for (delta, data) in ops_ours {
                merged.push(delta, data);
            }
        } else {
            conflicts.push(Conflict {
                key: key.clone(),
                description: String::from("conflicting changes on the same slot"),
                ours: ops_ours,
                theirs: ops_theirs,
            });
        }
    }

    Ok(MergeResult { merged, conflicts })
}

/// Distinct conflict keys of a change set, in first-seen order
fn affected_keys(changes: &ItemState, key_of: &impl Fn(&Delta) -> String) -> Vec<String> {
    let mut keys = Vec::new();
    for delta in changes.deltas() {
        let key = key_of(delta);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn changes_under(
    changes: &ItemState,
    key: &str,
    key_of: &impl Fn(&Delta) -> String,
) -> Vec<(Delta, DataTree)> {
    changes
        .entries()
        .filter(|(delta, _)| key_of(delta) == key)
        .map(|(delta, data)| (delta.create_copy(), data.clone()))
        .collect()
}

/// Equal kinds and payloads, ignoring delta ids
fn same_changes(a: &[(Delta, DataTree)], b: &[(Delta, DataTree)]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|((da, pa), (db, pb))| da.kind() == db.kind() && pa == pb)
}
