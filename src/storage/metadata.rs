//! Per-slot version stamp and schema fingerprint, read from file headers and cached.
//!
//! Cache entries are keyed on the file's size and modification time, so a file replaced
//! behind our back is re-read on the next lookup. A high-water mark per slot survives
//! deletion, which keeps stamps strictly increasing when a slot is recreated.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::Path;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::io::HeaderCodec;
use crate::types::{Slot, SlotMetadata, VersionStamp};

#[derive(Debug, Default)]
pub struct MetadataStore {
    cache: RwLock<HashMap<Slot, SlotMetadata>>,
    high_water: Mutex<HashMap<Slot, VersionStamp>>,
}

impl MetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of the file at `path`, or `None` when nothing is persisted.
    pub fn lookup(&self, slot: &Slot, path: &Path) -> Result<Option<SlotMetadata>> {
        let stat = match fs::metadata(path) {
            Ok(stat) => stat,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.cache.write().remove(slot);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let modified = stat.modified()?;

        if let Some(cached) = self.cache.read().get(slot) {
            if cached.size == stat.len() && cached.modified == modified {
                return Ok(Some(cached.clone()));
            }
        }

        let mut reader = BufReader::new(File::open(path)?);
        let header = HeaderCodec::read(&mut reader)?;
        let metadata = SlotMetadata {
            version: header.stamp,
            size: stat.len(),
            fingerprint: header.fingerprint,
            modified,
        };
        tracing::trace!(
            target = "annostore::metadata",
            %slot,
            version = %metadata.version,
            size = metadata.size,
            "refreshed slot metadata from header"
        );
        self.record(slot, metadata.clone());
        Ok(Some(metadata))
    }

    /// Remember metadata of a file this process just wrote.
    pub fn record(&self, slot: &Slot, metadata: SlotMetadata) {
        {
            let mut high_water = self.high_water.lock();
            let mark = high_water.entry(slot.clone()).or_default();
            if metadata.version > *mark {
                *mark = metadata.version;
            }
        }
        self.cache.write().insert(slot.clone(), metadata);
    }

    /// Drop cached metadata after the slot's file was removed. The high-water mark stays.
    pub fn forget(&self, slot: &Slot) {
        self.cache.write().remove(slot);
    }

    /// Stamp the next write to `slot` must carry, given the currently persisted one.
    #[must_use]
    pub fn next_stamp(&self, slot: &Slot, current: VersionStamp) -> VersionStamp {
        let mark = self
            .high_water
            .lock()
            .get(slot)
            .copied()
            .unwrap_or_default();
        current.max(mark).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    use crate::types::SchemaFingerprint;

    fn meta(version: u64) -> SlotMetadata {
        SlotMetadata {
            version: VersionStamp(version),
            size: 100,
            fingerprint: SchemaFingerprint::default(),
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn next_stamp_survives_forget() {
        let store = MetadataStore::new();
        let slot = Slot::new(1, "alice");
        assert_eq!(
            store.next_stamp(&slot, VersionStamp::UNPERSISTED),
            VersionStamp(1)
        );
        store.record(&slot, meta(4));
        store.forget(&slot);
        assert_eq!(
            store.next_stamp(&slot, VersionStamp::UNPERSISTED),
            VersionStamp(5)
        );
    }

    #[test]
    fn missing_file_yields_none() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = MetadataStore::new();
        let slot = Slot::new(1, "alice");
        store.record(&slot, meta(2));
        let found = store
            .lookup(&slot, &dir.path().join("absent.ann"))
            .expect("lookup");
        assert!(found.is_none());
    }
}
