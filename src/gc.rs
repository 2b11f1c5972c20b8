//! Mark-sweep garbage collection for the delta pack
//!
//! Identifies payloads no revision item refers to any more (left behind
//! by pruned branches or failed loads) and removes them from the pack.
//!
//! Author: Moroya Sakamoto

use std::collections::HashSet;

use crate::error::Result;
use crate::pack::PackKey;
use crate::revision::RevisionGraph;
use crate::revision_item::referenced_keys;
use crate::tracked_item::TrackedItem;

// ── GC Result ──────────────────────────────────────────────────────────

/// Statistics from a garbage collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcResult {
    /// Number of payloads retained (referenced by the graph).
    pub retained: usize,
    /// Number of payloads collected (removed).
    pub collected: usize,
    /// Total payloads before GC.
    pub total_before: usize,
}

impl GcResult {
    /// True if any payloads were collected.
    #[inline]
    pub fn did_collect(&self) -> bool {
        self.collected > 0
    }
}

// ── Mark-Sweep GC ─────────────────────────────────────────────────────

/// Run mark-sweep garbage collection on the graph's pack.
///
/// # Algorithm
///
/// 1. **Mark**: every `(item, delta)` key of every revision item in the
///    graph is reachable.
/// 2. **Sweep**: remove all pack keys not in the reachable set.
///
/// Payloads still pending in memory are not in the pack yet and are
/// unaffected.
pub fn collect_garbage(graph: &RevisionGraph) -> Result<GcResult> {
    let pack = graph.pack();
    let all_keys = pack.keys()?;
    let total_before = all_keys.len();
    let reachable = mark(graph);

    let mut collected = 0;
    for key in &all_keys {
        if !reachable.contains(key) && pack.remove_delta_data(key.item, key.delta)? {
            collected += 1;
        }
    }
    if collected > 0 {
        pack.sync()?;
        log::debug!("gc collected {collected} of {total_before} payloads");
    }

    Ok(GcResult {
        retained: total_before - collected,
        collected,
        total_before,
    })
}

/// Keys referenced by any revision item, loaded or not.
fn mark(graph: &RevisionGraph) -> HashSet<PackKey> {
    let mut reachable = HashSet::new();
    for revision in graph.revisions() {
        for item in &revision.items {
            reachable.extend(
                item.deltas()
                    .iter()
                    .map(|delta| PackKey::new(item.uuid(), delta.uuid())),
            );
        }
        for raw in &revision.unloaded {
            reachable.extend(referenced_keys(raw));
        }
    }
    reachable
}

/// Dry-run: compute what would be collected without actually removing.
pub fn dry_run(graph: &RevisionGraph) -> Result<GcResult> {
    let all_keys = graph.pack().keys()?;
    let total_before = all_keys.len();
    let reachable = mark(graph);
    let retained = all_keys.iter().filter(|k| reachable.contains(k)).count();
    Ok(GcResult {
        retained,
        collected: total_before - retained,
        total_before,
    })
}

// ── Tests ──────────────────────────────────────────────────────────────
