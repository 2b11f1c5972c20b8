//! Revision graph
//!
//! History as a tree of revisions. Each revision holds the revision items
//! recorded by one checkpoint; the state at any revision is obtained by
//! replaying the path from the root. `head` is the revision the live
//! project was last checked out at.
//!
//! Author: Moroya Sakamoto

use std::collections::{BTreeMap, HashSet};
#[cfg(feature = "file-pack")]
use std::io::Write;
#[cfg(feature = "file-pack")]
use std::path::Path;

use uuid::Uuid;

use crate::diff_logic::{create_logic_copy, DiffLogicRegistry};
use crate::error::{Result, VcsError};
use crate::pack::PackPtr;
use crate::revision_item::{RevisionItem, RevisionItemType, REVISION_ITEM_NODE};
use crate::tracked_item::{ItemState, TrackedItem, TrackedItemsSource};
use crate::tree::DataTree;

const HISTORY_NODE: &str = "vcsHistory";
const REVISION_NODE: &str = "revision";
const ROOT_ID: &str = "rootId";
const HEAD_ID: &str = "headId";
const REVISION_ID: &str = "revisionId";
const PARENT_ID: &str = "parentId";
const MESSAGE: &str = "message";
const TIMESTAMP: &str = "timestamp";

/// A revision in the history tree
#[derive(Debug)]
pub struct Revision {
    pub id: Uuid,
    /// `None` only for the root
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub items: Vec<RevisionItem>,
    /// Persisted items that failed to load, kept verbatim so saving and
    /// gc leave them intact
    pub unloaded: Vec<DataTree>,
}

impl Revision {
    fn new(parent: Option<Uuid>, message: &str, items: Vec<RevisionItem>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent,
            children: Vec::new(),
            message: String::from(message),
            timestamp: chrono::Utc::now().timestamp_millis(),
            items,
            unloaded: Vec::new(),
        }
    }

    pub fn item(&self, uuid: Uuid) -> Option<&RevisionItem> {
        self.items.iter().find(|item| item.uuid() == uuid)
    }

    fn serialize(&self) -> DataTree {
        let mut tree = DataTree::new(REVISION_NODE)
            .with_property(REVISION_ID, self.id)
            .with_property(MESSAGE, self.message.as_str())
            .with_property(TIMESTAMP, self.timestamp);
        if let Some(parent) = self.parent {
            tree.set_property(PARENT_ID, parent);
        }
        for item in &self.items {
            tree.append_child(item.serialize());
        }
        for raw in &self.unloaded {
            tree.append_child(raw.clone());
        }
        tree
    }
}

/// Revision tree plus the pack its payloads live in
pub struct RevisionGraph {
    pack: PackPtr,
    nodes: BTreeMap<Uuid, Revision>,
    root: Uuid,
    head: Uuid,
}

impl std::fmt::Debug for RevisionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionGraph")
            .field("root", &self.root)
            .field("head", &self.head)
            .field("revisions", &self.nodes.len())
            .finish()
    }
}

impl RevisionGraph {
    /// Graph holding only an empty root revision
    pub fn new(pack: PackPtr) -> Self {
        let root = Revision::new(None, "initial", Vec::new());
        let id = root.id;
        let mut nodes = BTreeMap::new();
        nodes.insert(id, root);
        Self {
            pack,
            nodes,
            root: id,
            head: id,
        }
    }

    pub fn pack(&self) -> &PackPtr {
        &self.pack
    }

    pub fn root_id(&self) -> Uuid {
        self.root
    }

    pub fn head_id(&self) -> Uuid {
        self.head
    }

    pub fn get(&self, id: Uuid) -> Option<&Revision> {
        self.nodes.get(&id)
    }

    pub fn head(&self) -> Option<&Revision> {
        self.nodes.get(&self.head)
    }

    pub fn children_of(&self, id: Uuid) -> &[Uuid] {
        self.nodes
            .get(&id)
            .map(|r| r.children.as_slice())
            .unwrap_or_default()
    }

    pub fn parent_of(&self, id: Uuid) -> Option<Uuid> {
        self.nodes.get(&id).and_then(|r| r.parent)
    }

    pub fn revision_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.nodes.values()
    }

    /// Append a revision under head and move head to it
    pub fn commit(&mut self, items: Vec<RevisionItem>, message: &str) -> Uuid {
        let revision = Revision::new(Some(self.head), message, items);
        let id = revision.id;
        if let Some(parent) = self.nodes.get_mut(&self.head) {
            parent.children.push(id);
        }
        self.nodes.insert(id, revision);
        self.head = id;
        log::debug!("committed revision {id} ({message})");
        id
    }

    /// Record every change of the live project since head.
    ///
    /// Returns `None` when nothing changed.
    pub fn checkpoint(
        &mut self,
        source: &dyn TrackedItemsSource,
        message: &str,
    ) -> Result<Option<Uuid>> {
        let head_states = self.materialize(self.head)?;
        let mut items = Vec::new();
        let mut seen = Vec::with_capacity(source.num_tracked_items());

        for i in 0..source.num_tracked_items() {
            let Some(live) = source.tracked_item(i) else {
                continue;
            };
            seen.push(live.uuid());
            let logic = create_logic_copy(live)?;

            match head_states.iter().find(|s| s.uuid() == live.uuid()) {
                None => {
                    let changes = logic.diff(&ItemState::empty_like(live), live)?;
                    items.push(RevisionItem::from_tracked_item(
                        self.pack.clone(),
                        RevisionItemType::Added,
                        &changes,
                    )?);
                }
                Some(previous) => {
                    let changes = logic.diff(previous, live)?;
                    if changes.is_empty() && previous.vcs_name() == live.vcs_name() {
                        continue;
                    }
                    items.push(RevisionItem::from_tracked_item(
                        self.pack.clone(),
                        RevisionItemType::Changed,
                        &changes,
                    )?);
                }
            }
        }

        for previous in &head_states {
            if !seen.contains(&previous.uuid()) {
                items.push(RevisionItem::from_tracked_item(
                    self.pack.clone(),
                    RevisionItemType::Removed,
                    previous,
                )?);
            }
        }

        if items.is_empty() {
            log::debug!("{}: nothing to checkpoint", source.vcs_name());
            return Ok(None);
        }
        Ok(Some(self.commit(items, message)))
    }

    /// Move head. Returns `false` for an unknown id.
    pub fn checkout(&mut self, id: Uuid) -> bool {
        if self.nodes.contains_key(&id) {
            self.head = id;
            true
        } else {
            false
        }
    }

    /// Revision ids from the root down to `id`
    pub fn path_to(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let revision = self
                .nodes
                .get(&current)
                .ok_or(VcsError::UnknownRevision { id: current })?;
            path.push(current);
            if path.len() > self.nodes.len() {
                return Err(VcsError::InvalidOperation {
                    reason: format!("revision {id} has a cyclic ancestry"),
                });
            }
            cursor = revision.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Project state at revision `id`, items in the order they were added
    pub fn materialize(&self, id: Uuid) -> Result<Vec<ItemState>> {
        let mut states: Vec<ItemState> = Vec::new();

        for revision_id in self.path_to(id)? {
            let Some(revision) = self.nodes.get(&revision_id) else {
                continue;
            };
            for item in &revision.items {
                let Some(logic) = item.diff_logic() else {
                    log::warn!("revision item {} has no diff logic, skipped", item.uuid());
                    continue;
                };
                let existing = states.iter().position(|s| s.uuid() == item.uuid());
                match (item.item_type(), existing) {
                    (RevisionItemType::Added, None) => {
                        states.push(logic.apply(&ItemState::empty_like(item), item)?);
                    }
                    (RevisionItemType::Added | RevisionItemType::Changed, Some(idx)) => {
                        let next = logic.apply(&states[idx], item)?;
                        states[idx] = next;
                    }
                    (RevisionItemType::Removed, Some(idx)) => {
                        states.remove(idx);
                    }
                    (item_type, _) => {
                        log::warn!(
                            "revision {revision_id}: cannot replay {:?} for {}",
                            item_type,
                            item.uuid()
                        );
                    }
                }
            }
        }

        Ok(states)
    }

    /// Push every pending payload into the pack. Returns payloads written.
    pub fn flush_data(&mut self) -> usize {
        self.nodes
            .values_mut()
            .flat_map(|revision| revision.items.iter_mut())
            .map(RevisionItem::flush_data)
            .sum()
    }

    /// Drop the subtree rooted at `id`. Returns the number of revisions removed.
    pub fn prune(&mut self, id: Uuid) -> Result<usize> {
        if !self.nodes.contains_key(&id) {
            return Err(VcsError::UnknownRevision { id });
        }
        if id == self.root {
            return Err(VcsError::InvalidOperation {
                reason: String::from("cannot prune the root revision"),
            });
        }
        if self.path_to(self.head)?.contains(&id) {
            return Err(VcsError::InvalidOperation {
                reason: format!("revision {id} is an ancestor of head"),
            });
        }

        if let Some(parent) = self.parent_of(id).and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|&child| child != id);
        }

        let mut removed = 0;
        let mut queue = vec![id];
        while let Some(current) = queue.pop() {
            if let Some(revision) = self.nodes.remove(&current) {
                queue.extend(revision.children);
                removed += 1;
            }
        }
        log::debug!("pruned {removed} revisions under {id}");
        Ok(removed)
    }

    /// Revisions in parent-before-child order
    fn walk(&self) -> Vec<&Revision> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = std::collections::VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            if let Some(revision) = self.nodes.get(&id) {
                order.push(revision);
                queue.extend(revision.children.iter().copied());
            }
        }
        order
    }

    pub fn serialize(&self) -> DataTree {
        let mut tree = DataTree::new(HISTORY_NODE)
            .with_property(ROOT_ID, self.root)
            .with_property(HEAD_ID, self.head);
        for revision in self.walk() {
            tree.append_child(revision.serialize());
        }
        tree
    }

    /// Rebuild a graph from its persisted form.
    ///
    /// A revision item that fails to load is set aside with an error log
    /// and written back unchanged on the next save; the rest of the history
    /// stays usable. Every revision must lead back to a parentless root,
    /// otherwise the whole load fails.
    pub fn deserialize(
        pack: PackPtr,
        tree: &DataTree,
        registry: &DiffLogicRegistry,
    ) -> Result<Self> {
        if !tree.has_name(HISTORY_NODE) {
            return Err(VcsError::UnexpectedNode {
                expected: String::from(HISTORY_NODE),
                found: String::from(tree.name()),
            });
        }
        let root = tree.uuid_property(ROOT_ID)?;
        let head = tree.uuid_property(HEAD_ID)?;

        let mut nodes = BTreeMap::new();
        let mut links = Vec::new();
        for node in tree.children().iter().filter(|c| c.has_name(REVISION_NODE)) {
            let id = node.uuid_property(REVISION_ID)?;
            let parent = match node.property(PARENT_ID) {
                Some(_) => Some(node.uuid_property(PARENT_ID)?),
                None => None,
            };
            let mut items = Vec::new();
            let mut unloaded = Vec::new();
            for child in node.children().iter().filter(|c| c.has_name(REVISION_ITEM_NODE)) {
                match RevisionItem::from_tree(pack.clone(), child, registry) {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        log::error!("revision {id}: keeping unloadable revision item as is: {e}");
                        unloaded.push(child.clone());
                    }
                }
            }
            if let Some(parent) = parent {
                links.push((parent, id));
            }
            let previous = nodes.insert(
                id,
                Revision {
                    id,
                    parent,
                    children: Vec::new(),
                    message: String::from(node.text_property(MESSAGE).unwrap_or_default()),
                    timestamp: node.int_property(TIMESTAMP).unwrap_or_default(),
                    items,
                    unloaded,
                },
            );
            if previous.is_some() {
                return Err(VcsError::InvalidOperation {
                    reason: format!("revision {id} appears twice"),
                });
            }
        }

        for (parent, child) in links {
            let revision = nodes
                .get_mut(&parent)
                .ok_or(VcsError::UnknownRevision { id: parent })?;
            revision.children.push(child);
        }
        for id in [root, head] {
            if !nodes.contains_key(&id) {
                return Err(VcsError::UnknownRevision { id });
            }
        }
        check_ancestry(&nodes, root)?;

        Ok(Self {
            pack,
            nodes,
            root,
            head,
        })
    }

    /// Flush payloads, sync the pack, then atomically write the history
    /// as JSON.
    #[cfg(feature = "file-pack")]
    pub fn save_to_file(&mut self, path: &Path) -> Result<()> {
        self.flush_data();
        self.pack.sync()?;

        let json = serde_json::to_vec_pretty(&self.serialize())?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(path).map_err(|e| VcsError::Io(e.error))?;
        log::debug!("saved {} revisions to {}", self.nodes.len(), path.display());
        Ok(())
    }

    #[cfg(feature = "file-pack")]
    pub fn load_from_file(
        path: &Path,
        pack: PackPtr,
        registry: &DiffLogicRegistry,
    ) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let tree: DataTree = serde_json::from_slice(&bytes)?;
        Self::deserialize(pack, &tree, registry)
    }
}

/// Every revision must reach the root through its parents, and the root
/// has none.
fn check_ancestry(nodes: &BTreeMap<Uuid, Revision>, root: Uuid) -> Result<()> {
    if nodes.get(&root).and_then(|r| r.parent).is_some() {
        return Err(VcsError::InvalidOperation {
            reason: format!("root revision {root} has a parent"),
        });
    }

    let mut anchored = HashSet::from([root]);
    for &id in nodes.keys() {
        let mut chain = HashSet::new();
        let mut cursor = id;
        while !anchored.contains(&cursor) {
            if !chain.insert(cursor) {
                return Err(VcsError::InvalidOperation {
                    reason: format!("revision {id} has a cyclic ancestry"),
                });
            }
            cursor = nodes.get(&cursor).and_then(|r| r.parent).ok_or_else(|| {
                VcsError::InvalidOperation {
                    reason: format!("revision {id} is detached from the root"),
                }
            })?;
        }
        anchored.extend(chain);
    }
    Ok(())
}
