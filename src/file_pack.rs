//! On-disk pack with lazy reads and deferred writes
//!
//! One file per tracked item (`<item-uuid>.pack`) holding all of that
//! item's payloads in the varint tree codec. Writes land in an overlay
//! and reach disk on [`Pack::sync`]; each item file is replaced
//! atomically. Reads check the overlay, then the per-item cache, then
//! load the item file on demand.
//!
//! Author: Moroya Sakamoto

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::codec::{decode_pack_entries, encode_pack_entries};
use crate::error::{Result, VcsError};
use crate::pack::{Pack, PackKey};
use crate::tree::DataTree;

const PACK_EXTENSION: &str = "pack";

/// File pack configuration.
#[derive(Clone, Debug)]
pub struct PackConfig {
    /// Directory holding the item files.
    pub path: PathBuf,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./pack"),
            create_if_missing: true,
        }
    }
}

impl PackConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Payloads of one item, ordered by delta id
type ItemEntries = BTreeMap<Uuid, DataTree>;

/// Pending writes; `None` marks a removal
type Overlay = HashMap<Uuid, BTreeMap<Uuid, Option<DataTree>>>;

pub struct FilePack {
    config: PackConfig,
    /// Item files already read from disk
    cache: RwLock<HashMap<Uuid, ItemEntries>>,
    /// Writes not yet on disk; entries stay here until their file is replaced
    pending: Mutex<Overlay>,
    /// One sync at a time
    sync_lock: Mutex<()>,
}

impl std::fmt::Debug for FilePack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePack")
            .field("path", &self.config.path)
            .field("cached_items", &self.cache.read().len())
            .field("pending_items", &self.pending.lock().len())
            .finish()
    }
}

impl FilePack {
    /// Open a pack directory, creating it if configured to.
    pub fn open(config: PackConfig) -> Result<Self> {
        if !config.path.is_dir() {
            if !config.create_if_missing {
                return Err(VcsError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("pack directory {} not found", config.path.display()),
                )));
            }
            fs::create_dir_all(&config.path)?;
        }
        log::debug!("opened pack at {}", config.path.display());
        Ok(Self {
            config,
            cache: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            sync_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Number of items with unsynced writes
    pub fn pending_items(&self) -> usize {
        self.pending.lock().len()
    }

    fn item_path(&self, item: Uuid) -> PathBuf {
        self.config
            .path
            .join(format!("{item}.{PACK_EXTENSION}"))
    }

    fn read_item_file(&self, item: Uuid) -> Result<ItemEntries> {
        let path = self.item_path(item);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ItemEntries::new()),
            Err(e) => return Err(e.into()),
        };
        let entries = decode_pack_entries(&bytes).ok_or(VcsError::CorruptPack { path })?;
        Ok(entries.into_iter().collect())
    }

    /// Committed entries of an item, loading the file on first use
    fn committed_entries(&self, item: Uuid) -> Result<ItemEntries> {
        if let Some(entries) = self.cache.read().get(&item) {
            return Ok(entries.clone());
        }
        let entries = self.read_item_file(item)?;
        // A concurrent sync may have cached a newer version meanwhile
        Ok(self.cache.write().entry(item).or_insert(entries).clone())
    }

    fn committed_lookup(&self, item: Uuid, delta: Uuid) -> Result<Option<DataTree>> {
        if let Some(entries) = self.cache.read().get(&item) {
            return Ok(entries.get(&delta).cloned());
        }
        let entries = self.read_item_file(item)?;
        let mut cache = self.cache.write();
        Ok(cache.entry(item).or_insert(entries).get(&delta).cloned())
    }

    fn write_item_file(&self, item: Uuid, entries: &ItemEntries) -> Result<()> {
        let path = self.item_path(item);
        if entries.is_empty() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
        let bytes = encode_pack_entries(entries.iter());
        let mut tmp = tempfile::NamedTempFile::new_in(&self.config.path)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| VcsError::Io(e.error))?;
        Ok(())
    }

    fn item_ids_on_disk(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.config.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PACK_EXTENSION) {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok());
            if let Some(id) = id {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

impl Pack for FilePack {
    fn set_delta_data_for(&self, item: Uuid, delta: Uuid, data: &DataTree) {
        self.pending
            .lock()
            .entry(item)
            .or_default()
            .insert(delta, Some(data.clone()));
    }

    fn fetch_delta_data(&self, item: Uuid, delta: Uuid) -> Result<Option<DataTree>> {
        if let Some(slot) = self.pending.lock().get(&item).and_then(|m| m.get(&delta)) {
            return Ok(slot.clone());
        }
        self.committed_lookup(item, delta)
    }

    fn remove_delta_data(&self, item: Uuid, delta: Uuid) -> Result<bool> {
        let existed = self.fetch_delta_data(item, delta)?.is_some();
        if existed {
            self.pending.lock().entry(item).or_default().insert(delta, None);
        }
        Ok(existed)
    }

    fn keys(&self) -> Result<Vec<PackKey>> {
        let mut items = self.item_ids_on_disk()?;
        let overlay = self.pending.lock().clone();
        items.extend(overlay.keys().copied());
        items.sort();
        items.dedup();

        let mut keys = Vec::new();
        for item in items {
            let mut entries: BTreeMap<Uuid, bool> = self
                .committed_entries(item)?
                .into_keys()
                .map(|d| (d, true))
                .collect();
            if let Some(changes) = overlay.get(&item) {
                for (delta, slot) in changes {
                    entries.insert(*delta, slot.is_some());
                }
            }
            keys.extend(
                entries
                    .into_iter()
                    .filter(|(_, live)| *live)
                    .map(|(delta, _)| PackKey::new(item, delta)),
            );
        }
        Ok(keys)
    }

    fn sync(&self) -> Result<()> {
        let _guard = self.sync_lock.lock();
        let snapshot = self.pending.lock().clone();

        for (item, changes) in snapshot {
            let mut entries = self.committed_entries(item)?;
            for (delta, slot) in &changes {
                match slot {
                    Some(data) => {
                        entries.insert(*delta, data.clone());
                    }
                    None => {
                        entries.remove(delta);
                    }
                }
            }
            self.write_item_file(item, &entries)?;
            log::debug!("synced {} payloads for item {item}", entries.len());
            self.cache.write().insert(item, entries);

            // Drop only what reached disk; newer writes stay pending
            let mut pending = self.pending.lock();
            if let Some(slots) = pending.get_mut(&item) {
                slots.retain(|delta, slot| changes.get(delta) != Some(&*slot));
                if slots.is_empty() {
                    pending.remove(&item);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: &str) -> DataTree {
        DataTree::new("name").with_property("value", value)
    }

    fn open(dir: &Path) -> FilePack {
        FilePack::open(PackConfig::at(dir)).unwrap()
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/pack");
        let pack = FilePack::open(PackConfig::at(&path)).unwrap();
        assert!(path.is_dir());
        assert_eq!(pack.path(), path.as_path());
    }

    #[test]
    fn test_open_missing_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = PackConfig {
            path: dir.path().join("absent"),
            create_if_missing: false,
        };
        assert!(FilePack::open(config).is_err());
    }

    #[test]
    fn test_write_is_deferred_until_sync() {
        let dir = tempfile::tempdir().unwrap();
        let pack = open(dir.path());
        let (item, delta) = (Uuid::new_v4(), Uuid::new_v4());
        pack.set_delta_data_for(item, delta, &payload("Lead"));

        // Visible to this pack, not yet on disk
        assert_eq!(pack.create_delta_data_for(item, delta), payload("Lead"));
        assert!(!pack.item_path(item).exists());
        assert_eq!(pack.pending_items(), 1);

        pack.sync().unwrap();
        assert!(pack.item_path(item).exists());
        assert_eq!(pack.pending_items(), 0);
    }

    #[test]
    fn test_reopen_reads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let (item, d1, d2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        {
            let pack = open(dir.path());
            pack.set_delta_data_for(item, d1, &payload("a"));
            pack.set_delta_data_for(item, d2, &payload("b"));
            pack.sync().unwrap();
        }
        let pack = open(dir.path());
        assert!(pack.cache.read().is_empty());
        assert_eq!(pack.create_delta_data_for(item, d2), payload("b"));
        assert_eq!(pack.cache.read().len(), 1);
        assert_eq!(pack.create_delta_data_for(item, d1), payload("a"));
    }

    #[test]
    fn test_sync_merges_with_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (item, d1, d2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        {
            let pack = open(dir.path());
            pack.set_delta_data_for(item, d1, &payload("a"));
            pack.sync().unwrap();
        }
        {
            let pack = open(dir.path());
            pack.set_delta_data_for(item, d2, &payload("b"));
            pack.sync().unwrap();
        }
        let pack = open(dir.path());
        assert_eq!(pack.create_delta_data_for(item, d1), payload("a"));
        assert_eq!(pack.create_delta_data_for(item, d2), payload("b"));
    }

    #[test]
    fn test_deep_payload_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (item, deep, flat) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let nested = (0..300).fold(DataTree::new("leaf"), |inner, _| {
            DataTree::new("group").with_child(inner)
        });
        {
            let pack = open(dir.path());
            pack.set_delta_data_for(item, deep, &nested);
            pack.set_delta_data_for(item, flat, &payload("a"));
            pack.sync().unwrap();
        }
        let pack = open(dir.path());
        assert_eq!(pack.fetch_delta_data(item, deep).unwrap(), Some(nested));
        assert_eq!(pack.create_delta_data_for(item, flat), payload("a"));
    }

    #[test]
    fn test_miss_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pack = open(dir.path());
        assert!(pack.fetch_delta_data(Uuid::new_v4(), Uuid::new_v4()).unwrap().is_none());
        assert!(!pack.create_delta_data_for(Uuid::new_v4(), Uuid::new_v4()).is_valid());
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let pack = open(dir.path());
        let item = Uuid::new_v4();
        fs::write(pack.item_path(item), b"garbage").unwrap();
        assert!(matches!(
            pack.fetch_delta_data(item, Uuid::new_v4()),
            Err(VcsError::CorruptPack { .. })
        ));
        // The provided lookup degrades to the sentinel
        assert!(!pack.create_delta_data_for(item, Uuid::new_v4()).is_valid());
    }

    #[test]
    fn test_remove_then_sync_drops_file() {
        let dir = tempfile::tempdir().unwrap();
        let pack = open(dir.path());
        let (item, delta) = (Uuid::new_v4(), Uuid::new_v4());
        pack.set_delta_data_for(item, delta, &payload("a"));
        pack.sync().unwrap();

        assert!(pack.remove_delta_data(item, delta).unwrap());
        assert!(pack.fetch_delta_data(item, delta).unwrap().is_none());
        assert!(pack.keys().unwrap().is_empty());
        pack.sync().unwrap();
        assert!(!pack.item_path(item).exists());
        assert!(!pack.remove_delta_data(item, delta).unwrap());
    }

    #[test]
    fn test_keys_cover_disk_and_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let pack = open(dir.path());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (d1, d2) = (Uuid::new_v4(), Uuid::new_v4());
        pack.set_delta_data_for(a, d1, &payload("a"));
        pack.sync().unwrap();
        pack.set_delta_data_for(b, d2, &payload("b"));

        let mut keys = pack.keys().unwrap();
        keys.sort();
        let mut expected = vec![PackKey::new(a, d1), PackKey::new(b, d2)];
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_written_key_readable_during_sync() {
        let dir = tempfile::tempdir().unwrap();
        let pack = std::sync::Arc::new(open(dir.path()));
        for round in 0..50 {
            let (item, delta) = (Uuid::new_v4(), Uuid::new_v4());
            let expected = payload(&format!("v{round}"));
            pack.set_delta_data_for(item, delta, &expected);

            let syncer = {
                let pack = std::sync::Arc::clone(&pack);
                std::thread::spawn(move || pack.sync())
            };
            while !syncer.is_finished() {
                assert_eq!(pack.fetch_delta_data(item, delta).unwrap().as_ref(), Some(&expected));
            }
            syncer.join().unwrap().unwrap();
            assert_eq!(pack.fetch_delta_data(item, delta).unwrap(), Some(expected));
        }
        assert_eq!(pack.pending_items(), 0);
    }

    #[test]
    fn test_write_during_sync_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let pack = open(dir.path());
        let (item, delta) = (Uuid::new_v4(), Uuid::new_v4());
        pack.set_delta_data_for(item, delta, &payload("old"));
        pack.sync().unwrap();

        // Same key rewritten after a sync snapshot would have been taken
        pack.set_delta_data_for(item, delta, &payload("new"));
        pack.sync().unwrap();
        let reopened = open(dir.path());
        assert_eq!(reopened.create_delta_data_for(item, delta), payload("new"));
    }

    #[test]
    fn test_failed_sync_keeps_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let pack = open(dir.path());
        let item = Uuid::new_v4();
        fs::write(pack.item_path(item), b"garbage").unwrap();
        let delta = Uuid::new_v4();
        pack.set_delta_data_for(item, delta, &payload("kept"));

        assert!(matches!(pack.sync(), Err(VcsError::CorruptPack { .. })));
        assert_eq!(pack.pending_items(), 1);
        assert_eq!(pack.create_delta_data_for(item, delta), payload("kept"));
    }

    #[test]
    fn test_foreign_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        fs::write(dir.path().join("bogus.pack"), b"hello").unwrap();
        let pack = open(dir.path());
        assert!(pack.keys().unwrap().is_empty());
    }
}
