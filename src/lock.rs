//! Cross-process advisory lock held while a slot is being written.
//!
//! In-process writers are already serialized by the slot pool; this lock only keeps a
//! second process on the same host from interleaving its own commit.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Result, StoreError};
use crate::types::Slot;

const RETRY_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub struct SlotFileLock {
    file: File,
    path: PathBuf,
}

impl SlotFileLock {
    /// Take an exclusive lock on `path` for `slot`, creating the file if needed. Waiting
    /// longer than `timeout` fails with `PoolTimeout`, same as the in-process slot lock.
    pub fn acquire(slot: &Slot, path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            target = "annostore::lock",
                            %slot,
                            path = %path.display(),
                            ?timeout,
                            "slot file lock held by another process"
                        );
                        return Err(StoreError::PoolTimeout {
                            slot: slot.clone(),
                            waited: timeout,
                        });
                    }
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SlotFileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(
                target = "annostore::lock",
                path = %self.path.display(),
                error = %err,
                "failed to release slot lock"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_handle_times_out_while_first_is_held() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("alice.lock");
        let slot = Slot::new(3, "alice");
        let first = SlotFileLock::acquire(&slot, &path, Duration::from_millis(50)).expect("first");
        let second = SlotFileLock::acquire(&slot, &path, Duration::from_millis(30));
        let err = second.expect_err("contended");
        assert!(matches!(&err, StoreError::PoolTimeout { slot: held, .. } if *held == slot));
        assert!(err.is_transient());
        drop(first);
        SlotFileLock::acquire(&slot, &path, Duration::from_millis(50)).expect("after release");
    }
}
