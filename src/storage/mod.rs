//! Slot-scoped persistence of native annotation-state bytes.
//!
//! Responsibilities:
//! - Replace a slot's file atomically (temp file + rename + directory sync).
//! - Answer metadata queries from the header alone.
//! - Provide the optimistic-concurrency primitive `verify_timestamp`.
//! - Bulk export/import of raw bytes, bypassing the pool entirely.

pub mod metadata;

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};

use atomic_write_file::AtomicWriteFile;

use crate::error::{Result, StoreError};
use crate::io::{HeaderCodec, codec};
use crate::layout::Layout;
use crate::types::{Slot, SlotMetadata, VersionStamp};

pub use metadata::MetadataStore;

/// Persistence contract consumed by the pool, the backup manager and the guard.
pub trait StorageDriver: Send + Sync {
    /// Current persisted bytes; `NotFound` if the slot has none.
    fn read(&self, slot: &Slot) -> Result<Vec<u8>>;

    /// Atomically replace the slot's bytes. The bytes must be a valid native encoding
    /// whose stamp is newer than the persisted one; on failure the previous bytes stay.
    fn write(&self, slot: &Slot, bytes: &[u8]) -> Result<()>;

    /// Copy the persisted bytes to `out`, returning the number of bytes copied.
    fn export_to(&self, slot: &Slot, out: &mut dyn Write) -> Result<u64>;

    /// Replace the slot with native bytes from `input`, re-stamped so the version still
    /// increases. Returns the new stamp.
    fn import_from(&self, slot: &Slot, input: &mut dyn Read) -> Result<VersionStamp>;

    /// Remove the persisted value. Returns `false` if there was none.
    fn delete(&self, slot: &Slot) -> Result<bool>;

    fn exists(&self, slot: &Slot) -> Result<bool>;

    fn metadata(&self, slot: &Slot) -> Result<Option<SlotMetadata>>;

    /// Fail with `ConcurrentModification(context)` unless the persisted stamp equals
    /// `expected`; otherwise return it.
    fn verify_timestamp(
        &self,
        slot: &Slot,
        expected: VersionStamp,
        context: &str,
    ) -> Result<VersionStamp>;

    /// The stamp the next write to `slot` must carry.
    fn next_stamp(&self, slot: &Slot) -> Result<VersionStamp>;
}

/// File-system backed driver following [`Layout`].
#[derive(Debug)]
pub struct FsStorage {
    layout: Layout,
    metadata: MetadataStore,
}

impl FsStorage {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            metadata: MetadataStore::new(),
        }
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn current_stamp(&self, slot: &Slot) -> Result<VersionStamp> {
        Ok(self
            .metadata(slot)?
            .map_or(VersionStamp::UNPERSISTED, |meta| meta.version))
    }

    fn replace(&self, slot: &Slot, bytes: &[u8]) -> Result<()> {
        let path = self.layout.slot_path(slot)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let header = codec::validate(bytes)?;

        let mut staging = AtomicWriteFile::options().open(&path)?;
        staging.write_all(bytes)?;
        staging.flush()?;
        staging.commit()?;

        let stat = fs::metadata(&path)?;
        self.metadata.record(
            slot,
            SlotMetadata {
                version: header.stamp,
                size: stat.len(),
                fingerprint: header.fingerprint,
                modified: stat.modified()?,
            },
        );
        tracing::debug!(
            target = "annostore::storage",
            %slot,
            version = %header.stamp,
            bytes = bytes.len(),
            "slot written"
        );
        Ok(())
    }
}

impl StorageDriver for FsStorage {
    fn read(&self, slot: &Slot) -> Result<Vec<u8>> {
        let path = self.layout.slot_path(slot)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound { slot: slot.clone() })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, slot: &Slot, bytes: &[u8]) -> Result<()> {
        let incoming = HeaderCodec::decode(bytes)?.stamp;
        let current = self.current_stamp(slot)?;
        if incoming <= current {
            return Err(StoreError::ConcurrentModification {
                context: "write".into(),
                expected: current.next(),
                actual: incoming,
            });
        }
        self.replace(slot, bytes)
    }

    fn export_to(&self, slot: &Slot, out: &mut dyn Write) -> Result<u64> {
        let path = self.layout.slot_path(slot)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { slot: slot.clone() });
            }
            Err(err) => return Err(err.into()),
        };
        let copied = std::io::copy(&mut file, out)?;
        out.flush()?;
        Ok(copied)
    }

    fn import_from(&self, slot: &Slot, input: &mut dyn Read) -> Result<VersionStamp> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        codec::validate(&bytes)?;
        let stamp = self.next_stamp(slot)?;
        HeaderCodec::patch_stamp(&mut bytes, stamp)?;
        self.replace(slot, &bytes)?;
        tracing::info!(
            target = "annostore::storage",
            %slot,
            version = %stamp,
            bytes = bytes.len(),
            "slot imported"
        );
        Ok(stamp)
    }

    fn delete(&self, slot: &Slot) -> Result<bool> {
        let path = self.layout.slot_path(slot)?;
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        self.metadata.forget(slot);
        if removed {
            tracing::info!(target = "annostore::storage", %slot, "slot deleted");
        }
        Ok(removed)
    }

    fn exists(&self, slot: &Slot) -> Result<bool> {
        Ok(self.layout.slot_path(slot)?.is_file())
    }

    fn metadata(&self, slot: &Slot) -> Result<Option<SlotMetadata>> {
        let path = self.layout.slot_path(slot)?;
        self.metadata.lookup(slot, &path)
    }

    fn verify_timestamp(
        &self,
        slot: &Slot,
        expected: VersionStamp,
        context: &str,
    ) -> Result<VersionStamp> {
        let current = self.current_stamp(slot)?;
        if current != expected {
            tracing::info!(
                target = "annostore::storage",
                %slot,
                %expected,
                actual = %current,
                context,
                "version stamp mismatch"
            );
            return Err(StoreError::ConcurrentModification {
                context: context.to_string(),
                expected,
                actual: current,
            });
        }
        Ok(current)
    }

    fn next_stamp(&self, slot: &Slot) -> Result<VersionStamp> {
        let current = self.current_stamp(slot)?;
        Ok(self.metadata.next_stamp(slot, current))
    }
}
