//! In-memory index of every object on disk.
//!
//! The index is the single source of truth for reads. It is filled once by
//! [`MetadataIndex::rebuild`] and afterwards only changes through explicit
//! calls made alongside Object Store mutations. Changes made to the storage
//! directory by other processes are not noticed until the next restart.

use super::{object_store::ObjectStore, storage_service::StorageResult};
use crate::models::object::Object;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{info, warn};

/// Composite key of an object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub bin: String,
    pub filename: String,
}

impl ObjectKey {
    pub fn new(bin: &str, filename: &str) -> Self {
        Self {
            bin: bin.to_string(),
            filename: filename.to_string(),
        }
    }
}

/// One index row: the object plus the order it was inserted in.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    pub seq: u64,
    pub object: Object,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<ObjectKey, IndexEntry>,
    next_seq: u64,
}

/// Counters reported by [`MetadataIndex::rebuild`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    pub bins: usize,
    pub objects: usize,
    pub skipped: usize,
}

/// Concurrent `(bin, filename) -> Object` map.
///
/// A single reader/writer lock guards the whole map; every operation is a
/// short critical section and the lock is never held across an `.await`.
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MetadataIndex {
    inner: Arc<RwLock<Inner>>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the index from a full scan of the store.
    ///
    /// Every object is hashed, so this costs O(total bytes). Objects that
    /// fail to probe are logged and skipped; a failure to read the root
    /// itself is returned.
    pub async fn rebuild(&self, store: &ObjectStore) -> StorageResult<RebuildStats> {
        info!("Rebuilding metadata index from {}", store.root().display());
        let mut stats = RebuildStats::default();

        for bin in store.list_bins().await? {
            let names = match store.list_objects(&bin).await {
                Ok(names) => names,
                Err(err) => {
                    warn!(bin = %bin, error = %err, "skipping unreadable bin");
                    continue;
                }
            };

            let mut found = 0;
            for filename in names {
                match store.probe(&bin, &filename).await {
                    Ok(object) => {
                        self.put(object);
                        found += 1;
                    }
                    Err(err) => {
                        warn!(bin = %bin, filename = %filename, error = %err, "skipping unreadable object");
                        stats.skipped += 1;
                    }
                }
            }
            if found > 0 {
                stats.bins += 1;
                stats.objects += found;
            }
        }

        if self.is_empty() {
            info!("No objects found under {}", store.root().display());
        }
        info!(
            bins = stats.bins,
            objects = stats.objects,
            skipped = stats.skipped,
            "Metadata index rebuilt"
        );
        Ok(stats)
    }

    pub fn get(&self, bin: &str, filename: &str) -> Option<Object> {
        self.inner
            .read()
            .entries
            .get(&ObjectKey::new(bin, filename))
            .map(|e| e.object.clone())
    }

    /// Insert or replace an object. A replacement counts as a new insertion
    /// for ordering purposes. Returns the replaced object, if any.
    pub fn put(&self, object: Object) -> Option<Object> {
        let key = ObjectKey::new(&object.bin, &object.filename);
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .entries
            .insert(key, IndexEntry { seq, object })
            .map(|e| e.object)
    }

    /// Replace an object that is still indexed with the same content,
    /// keeping its position.
    ///
    /// Returns `false` (and changes nothing) when the object has been deleted
    /// or re-uploaded with different bytes in the meantime, so late
    /// background updates never resurrect or overwrite it.
    pub fn refresh(&self, object: Object) -> bool {
        let key = ObjectKey::new(&object.bin, &object.filename);
        let mut inner = self.inner.write();
        match inner.entries.get_mut(&key) {
            Some(entry) if entry.object.checksum == object.checksum => {
                entry.object = object;
                true
            }
            _ => false,
        }
    }

    pub fn delete(&self, bin: &str, filename: &str) -> Option<Object> {
        self.inner
            .write()
            .entries
            .remove(&ObjectKey::new(bin, filename))
            .map(|e| e.object)
    }

    /// Drop every object of a bin. Returns how many were removed.
    pub fn delete_bin(&self, bin: &str) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| key.bin != bin);
        before - inner.entries.len()
    }

    /// Objects of one bin in insertion order.
    pub fn list_by_bin(&self, bin: &str) -> Vec<Object> {
        let inner = self.inner.read();
        let mut entries: Vec<&IndexEntry> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.bin == bin)
            .map(|(_, entry)| entry)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.object.clone()).collect()
    }

    /// Objects of every bin, grouped by bin id, each group in insertion
    /// order. Taken in one critical section so all groups are consistent.
    pub fn snapshot_by_bin(&self) -> BTreeMap<String, Vec<Object>> {
        let inner = self.inner.read();
        let mut grouped: BTreeMap<String, Vec<&IndexEntry>> = BTreeMap::new();
        for (key, entry) in &inner.entries {
            grouped.entry(key.bin.clone()).or_default().push(entry);
        }
        grouped
            .into_iter()
            .map(|(bin, mut entries)| {
                entries.sort_by_key(|e| e.seq);
                (bin, entries.into_iter().map(|e| e.object.clone()).collect())
            })
            .collect()
    }

    /// Latest `created_at` in a bin, or `None` when it has no objects.
    pub fn last_update(&self, bin: &str) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|(key, _)| key.bin == bin)
            .map(|(_, entry)| entry.object.created_at)
            .max()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
