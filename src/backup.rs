//! Pre-write snapshots of a slot's persisted bytes, with retention.
//!
//! A snapshot is taken of whatever is on disk right before the guard replaces it, so
//! every overwritten version is recoverable until retention prunes it. File names carry
//! the UTC creation time and the snapshotted stamp:
//! `<root>/<doc>/backups/<annotator>.<yyyymmddHHMMSSmmm>.<stamp>.bak`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atomic_write_file::AtomicWriteFile;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{BACKUP_EXTENSION, BACKUP_TIMESTAMP_FORMAT};
use crate::error::Result;
use crate::io::codec;
use crate::layout::{Layout, file_stem};
use crate::storage::StorageDriver;
use crate::types::{RetentionPolicy, Slot, VersionStamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub slot: Slot,
    pub created_at: DateTime<Utc>,
    /// Version of the snapshotted bytes.
    pub stamp: VersionStamp,
    pub path: PathBuf,
}

pub struct BackupManager {
    layout: Layout,
    driver: Arc<dyn StorageDriver>,
    retention: RetentionPolicy,
}

impl BackupManager {
    pub fn new(layout: Layout, driver: Arc<dyn StorageDriver>, retention: RetentionPolicy) -> Self {
        Self {
            layout,
            driver,
            retention,
        }
    }

    #[must_use]
    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Snapshot the currently persisted bytes of `slot`, then apply retention.
    ///
    /// Returns `None` when nothing is persisted yet. The snapshot is durable before this
    /// returns; a failure here must abort the write that asked for it.
    pub fn backup_before_write(&self, slot: &Slot) -> Result<Option<BackupEntry>> {
        let Some(current) = self.driver.metadata(slot)? else {
            return Ok(None);
        };
        // File names keep milliseconds; the returned entry must equal the listed one.
        let created_at = Utc::now().trunc_subsecs(3);
        let dir = self.layout.backup_dir(slot.document);
        fs::create_dir_all(&dir)?;
        let path = dir.join(backup_file_name(slot, created_at, current.version)?);

        if path.exists() {
            // Same stamp within the same millisecond: identical bytes are already saved.
            tracing::debug!(
                target = "annostore::backup",
                %slot,
                path = %path.display(),
                "backup already present"
            );
        } else {
            let mut staging = AtomicWriteFile::options().open(&path)?;
            let copied = self.driver.export_to(slot, &mut staging)?;
            staging.commit()?;
            tracing::info!(
                target = "annostore::backup",
                %slot,
                version = %current.version,
                bytes = copied,
                path = %path.display(),
                "backup written"
            );
        }

        let entry = BackupEntry {
            slot: slot.clone(),
            created_at,
            stamp: current.version,
            path,
        };
        self.prune(slot)?;
        Ok(Some(entry))
    }

    /// Backups of `slot`, oldest first.
    pub fn list(&self, slot: &Slot) -> Result<Vec<BackupEntry>> {
        let dir = self.layout.backup_dir(slot.document);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let prefix = format!("{}.", file_stem(&slot.annotator)?);
        let mut backups = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            if let Some((created_at, stamp)) = parse_backup_suffix(rest) {
                backups.push(BackupEntry {
                    slot: slot.clone(),
                    created_at,
                    stamp,
                    path,
                });
            }
        }
        backups.sort_by(|a, b| (a.created_at, a.stamp).cmp(&(b.created_at, b.stamp)));
        Ok(backups)
    }

    /// Raw native bytes of a backup, verified against their checksum.
    pub fn read(&self, entry: &BackupEntry) -> Result<Vec<u8>> {
        let bytes = fs::read(&entry.path)?;
        codec::validate(&bytes)?;
        Ok(bytes)
    }

    /// Remove backups beyond the retention policy. The newest backup always survives.
    /// Returns the number of files removed.
    pub fn prune(&self, slot: &Slot) -> Result<usize> {
        let backups = self.list(slot)?;
        let Some(newest) = backups.len().checked_sub(1) else {
            return Ok(0);
        };
        let keep_from = self
            .retention
            .max_backups
            .map_or(0, |max| backups.len().saturating_sub(max));
        let cutoff = self
            .retention
            .max_age()
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .map(|age| Utc::now() - age);

        let mut removed = 0;
        for (position, backup) in backups.iter().enumerate() {
            if position == newest {
                break;
            }
            let too_many = position < keep_from;
            let too_old = cutoff.is_some_and(|cutoff| backup.created_at < cutoff);
            if !(too_many || too_old) {
                continue;
            }
            if remove_if_present(&backup.path)? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(
                target = "annostore::prune",
                %slot,
                removed,
                kept = backups.len() - removed,
                "pruned backups"
            );
        }
        Ok(removed)
    }
}

fn backup_file_name(slot: &Slot, created_at: DateTime<Utc>, stamp: VersionStamp) -> Result<String> {
    Ok(format!(
        "{}.{}.{}.{BACKUP_EXTENSION}",
        file_stem(&slot.annotator)?,
        created_at.format(BACKUP_TIMESTAMP_FORMAT),
        stamp.0
    ))
}

/// Parse `<timestamp>.<stamp>.bak`.
fn parse_backup_suffix(rest: &str) -> Option<(DateTime<Utc>, VersionStamp)> {
    let rest = rest.strip_suffix(BACKUP_EXTENSION)?.strip_suffix('.')?;
    let (timestamp, stamp) = rest.rsplit_once('.')?;
    if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let created_at = NaiveDateTime::parse_from_str(timestamp, BACKUP_TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    let stamp = stamp.parse().ok().map(VersionStamp)?;
    Some((created_at, stamp))
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::encode_state;
    use crate::storage::FsStorage;
    use crate::types::{AnnotationState, Record, SchemaFingerprint};
    use tempfile::TempDir;

    fn setup(retention: RetentionPolicy) -> (TempDir, Arc<FsStorage>, BackupManager) {
        let dir = TempDir::new().expect("tempdir");
        let layout = Layout::new(dir.path());
        let storage = Arc::new(FsStorage::new(layout.clone()));
        let manager = BackupManager::new(layout, storage.clone(), retention);
        (dir, storage, manager)
    }

    fn write(storage: &FsStorage, slot: &Slot, stamp: u64) {
        let mut state = AnnotationState::new("some text");
        state.add(Record::token(0, 4));
        let bytes =
            encode_state(&state, VersionStamp(stamp), SchemaFingerprint::of(b"v1")).expect("encode");
        storage.write(slot, &bytes).expect("write");
    }

    #[test]
    fn first_write_has_nothing_to_back_up() {
        let (_dir, _storage, manager) = setup(RetentionPolicy::default());
        let slot = Slot::new(7, "alice");
        assert!(manager.backup_before_write(&slot).expect("backup").is_none());
        assert!(manager.list(&slot).expect("list").is_empty());
    }

    #[test]
    fn backup_captures_current_bytes() {
        let (_dir, storage, manager) = setup(RetentionPolicy::default());
        let slot = Slot::new(7, "alice");
        write(&storage, &slot, 1);
        let entry = manager
            .backup_before_write(&slot)
            .expect("backup")
            .expect("entry");
        assert_eq!(entry.stamp, VersionStamp(1));
        assert_eq!(
            manager.read(&entry).expect("read"),
            storage.read(&slot).expect("current")
        );
        assert_eq!(manager.list(&slot).expect("list"), vec![entry]);
    }

    #[test]
    fn returned_entry_has_file_name_precision() {
        use chrono::Timelike;

        let (_dir, storage, manager) = setup(RetentionPolicy::default());
        let slot = Slot::new(7, "alice");
        for stamp in 1..=3 {
            write(&storage, &slot, stamp);
            let entry = manager
                .backup_before_write(&slot)
                .expect("backup")
                .expect("entry");
            assert_eq!(entry.created_at.nanosecond() % 1_000_000, 0);
            let listed = manager.list(&slot).expect("list");
            assert_eq!(listed.last(), Some(&entry));
        }
    }

    #[test]
    fn retention_keeps_newest_n() {
        let (_dir, storage, manager) = setup(RetentionPolicy::keep_last(2));
        let slot = Slot::new(7, "alice");
        for stamp in 1..=5 {
            write(&storage, &slot, stamp);
            manager.backup_before_write(&slot).expect("backup");
        }
        let stamps: Vec<_> = manager
            .list(&slot)
            .expect("list")
            .into_iter()
            .map(|entry| entry.stamp.0)
            .collect();
        assert_eq!(stamps, vec![4, 5]);
    }

    #[test]
    fn zero_age_keeps_only_the_newest() {
        let retention = RetentionPolicy {
            max_backups: None,
            max_age_secs: Some(0),
        };
        let (_dir, storage, manager) = setup(retention);
        let slot = Slot::new(7, "alice");
        for stamp in 1..=3 {
            write(&storage, &slot, stamp);
            manager.backup_before_write(&slot).expect("backup");
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let backups = manager.list(&slot).expect("list");
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].stamp, VersionStamp(3));
    }

    #[test]
    fn listing_ignores_other_annotators_and_foreign_files() {
        let (_dir, storage, manager) = setup(RetentionPolicy::default());
        let alice = Slot::new(7, "alice");
        let dotted = Slot::new(7, "alice.b");
        write(&storage, &alice, 1);
        write(&storage, &dotted, 1);
        manager.backup_before_write(&alice).expect("backup");
        manager.backup_before_write(&dotted).expect("backup");
        fs::write(
            manager.layout.backup_dir(alice.document).join("alice.notes.bak"),
            b"x",
        )
        .expect("foreign");
        assert_eq!(manager.list(&alice).expect("list").len(), 1);
        assert_eq!(manager.list(&dotted).expect("list").len(), 1);
    }

    #[test]
    fn suffix_parsing() {
        let (created_at, stamp) =
            parse_backup_suffix("20261019134501123.42.bak").expect("parse");
        assert_eq!(stamp, VersionStamp(42));
        assert_eq!(
            created_at.format(BACKUP_TIMESTAMP_FORMAT).to_string(),
            "20261019134501123"
        );
        assert!(parse_backup_suffix("b.20261019134501123.42.bak").is_none());
        assert!(parse_backup_suffix("20261019134501123.bak").is_none());
    }
}
