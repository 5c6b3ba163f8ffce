//! Optimistic concurrency over slots.
//!
//! A caller checks out a slot, edits its copy and commits with the stamp it started
//! from. Commits on one slot run one at a time under the slot's pool lock plus a
//! cross-process file lock, and each re-verifies the stamp, so the second of two racing
//! committers fails with `ConcurrentModification` instead of overwriting the first.

use std::sync::Arc;

use crate::backup::BackupManager;
use crate::consistency::ConsistencyPipeline;
use crate::error::Result;
use crate::io::{decode_state, encode_state};
use crate::layout::Layout;
use crate::lock::SlotFileLock;
use crate::pool::{PoolLease, SlotPool};
use crate::storage::StorageDriver;
use crate::types::{AnnotationState, SchemaFingerprint, Slot, VersionStamp};

/// Logical state of a slot from the guard's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    /// At least one caller holds a checkout.
    CheckedOut,
    /// A commit or delete holds the slot lock.
    Committing,
}

/// A caller's working snapshot: the state, the stamp it was read at and a pool lease.
///
/// The state is shared with the pool until the first call to [`Checkout::state_mut`],
/// which copies it.
#[derive(Debug)]
pub struct Checkout {
    slot: Slot,
    base: Arc<AnnotationState>,
    state: Arc<AnnotationState>,
    stamp: VersionStamp,
    fingerprint: SchemaFingerprint,
    lease: Option<PoolLease>,
}

impl Checkout {
    /// Working snapshot for a slot that has nothing persisted yet.
    pub fn create(slot: Slot, state: AnnotationState, fingerprint: SchemaFingerprint) -> Self {
        let state = Arc::new(state);
        Self {
            slot,
            base: Arc::new(AnnotationState::new(state.text())),
            state,
            stamp: VersionStamp::UNPERSISTED,
            fingerprint,
            lease: None,
        }
    }

    #[must_use]
    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    /// Stamp the snapshot was taken at; the expected stamp of the next commit.
    #[must_use]
    pub fn stamp(&self) -> VersionStamp {
        self.stamp
    }

    #[must_use]
    pub fn fingerprint(&self) -> SchemaFingerprint {
        self.fingerprint
    }

    #[must_use]
    pub fn state(&self) -> &AnnotationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AnnotationState {
        Arc::make_mut(&mut self.state)
    }

    /// The state as it was when checked out or last committed.
    #[must_use]
    pub fn base(&self) -> &AnnotationState {
        &self.base
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        !Arc::ptr_eq(&self.base, &self.state)
    }

    /// Whether the snapshot holds a pool lease, i.e. was read from persisted state.
    #[must_use]
    pub fn is_leased(&self) -> bool {
        self.lease.is_some()
    }

    pub(crate) fn shared_state(&self) -> Arc<AnnotationState> {
        self.state.clone()
    }

    /// Give up the snapshot. Dropping it has the same effect.
    pub fn release(self) {}
}

pub struct ConcurrencyGuard {
    layout: Layout,
    driver: Arc<dyn StorageDriver>,
    pool: Arc<SlotPool>,
    backups: Arc<BackupManager>,
    pipeline: Arc<ConsistencyPipeline>,
}

impl ConcurrencyGuard {
    pub fn new(
        layout: Layout,
        driver: Arc<dyn StorageDriver>,
        pool: Arc<SlotPool>,
        backups: Arc<BackupManager>,
        pipeline: Arc<ConsistencyPipeline>,
    ) -> Self {
        Self {
            layout,
            driver,
            pool,
            backups,
            pipeline,
        }
    }

    /// Take a working snapshot of `slot`. Fails with `NotFound` if nothing is persisted.
    pub fn checkout(&self, slot: &Slot) -> Result<Checkout> {
        let (entry, lease) = self.pool.acquire(slot)?;
        tracing::debug!(target = "annostore::guard", %slot, version = %entry.stamp, "checked out");
        Ok(Checkout {
            slot: slot.clone(),
            base: entry.state.clone(),
            state: entry.state,
            stamp: entry.stamp,
            fingerprint: entry.fingerprint,
            lease: Some(lease),
        })
    }

    /// Persist `state` if the slot is still at `expected`. Returns the new stamp.
    ///
    /// Order: save-time checks, slot lock, stamp verification, backup, write, pool
    /// refresh. Any failure leaves the persisted bytes untouched.
    pub fn commit(
        &self,
        slot: &Slot,
        state: Arc<AnnotationState>,
        expected: VersionStamp,
        context: &str,
    ) -> Result<VersionStamp> {
        self.persist(slot, state, Some(expected), context)
            .map(|(stamp, _)| stamp)
    }

    /// Administrative replacement of a slot's state regardless of its current stamp.
    /// Save-time checks and the backup still apply.
    pub fn overwrite(
        &self,
        slot: &Slot,
        state: Arc<AnnotationState>,
        context: &str,
    ) -> Result<VersionStamp> {
        self.persist(slot, state, None, context)
            .map(|(stamp, _)| stamp)
    }

    /// Replace a slot with native bytes (a backup, or an export of another slot). The
    /// bytes are re-stamped by the driver; the cached entry is dropped so the next
    /// checkout parses what was written.
    pub fn import_native(&self, slot: &Slot, bytes: &[u8], context: &str) -> Result<VersionStamp> {
        let (_, state) = decode_state(bytes)?;
        self.pipeline.check_on_save(slot, &state)?;

        let mut slot_guard = self.pool.lock_slot(slot)?;
        let _file_lock = self.lock_file(slot)?;
        self.backups.backup_before_write(slot)?;
        let stamp = self.driver.import_from(slot, &mut &bytes[..])?;
        slot_guard.evict();
        tracing::info!(
            target = "annostore::commit",
            %slot,
            context,
            version = %stamp,
            bytes = bytes.len(),
            "native bytes imported"
        );
        Ok(stamp)
    }

    fn lock_file(&self, slot: &Slot) -> Result<SlotFileLock> {
        SlotFileLock::acquire(
            slot,
            &self.layout.lock_path(slot)?,
            self.pool.options().lock_timeout(),
        )
    }

    fn persist(
        &self,
        slot: &Slot,
        state: Arc<AnnotationState>,
        expected: Option<VersionStamp>,
        context: &str,
    ) -> Result<(VersionStamp, SchemaFingerprint)> {
        let advisory = self.pipeline.check_on_save(slot, &state)?;

        let mut slot_guard = self.pool.lock_slot(slot)?;
        let _file_lock = self.lock_file(slot)?;

        if let Some(expected) = expected {
            self.driver.verify_timestamp(slot, expected, context)?;
        }
        let backup = self.backups.backup_before_write(slot)?;

        let stamp = self.driver.next_stamp(slot)?;
        let fingerprint = self.pool.current_fingerprint(slot.document)?;
        let bytes = encode_state(&state, stamp, fingerprint)?;
        self.driver.write(slot, &bytes)?;
        slot_guard.install(state, stamp, fingerprint);

        tracing::info!(
            target = "annostore::commit",
            %slot,
            context,
            expected = ?expected.map(|stamp| stamp.0),
            version = %stamp,
            bytes = bytes.len(),
            backup = backup.is_some(),
            warnings = advisory.len(),
            "commit persisted"
        );
        Ok((stamp, fingerprint))
    }

    /// Commit a checkout's state with its stamp as the expectation. On success the
    /// checkout advances to the new stamp so editing can continue.
    pub fn commit_checkout(&self, checkout: &mut Checkout, context: &str) -> Result<VersionStamp> {
        let state = checkout.shared_state();
        let (stamp, fingerprint) =
            self.persist(&checkout.slot, state.clone(), Some(checkout.stamp), context)?;
        checkout.stamp = stamp;
        checkout.base = state;
        checkout.fingerprint = fingerprint;
        Ok(stamp)
    }

    /// Remove the persisted value of `slot`, keeping a backup of it. Returns `false` if
    /// nothing was persisted.
    pub fn delete(&self, slot: &Slot) -> Result<bool> {
        let mut slot_guard = self.pool.lock_slot(slot)?;
        let _file_lock = self.lock_file(slot)?;
        self.backups.backup_before_write(slot)?;
        let removed = self.driver.delete(slot)?;
        slot_guard.evict();
        tracing::info!(target = "annostore::guard", %slot, removed, "slot deleted");
        Ok(removed)
    }

    #[must_use]
    pub fn slot_state(&self, slot: &Slot) -> SlotState {
        let activity = self.pool.activity(slot);
        if activity.committing {
            SlotState::Committing
        } else if activity.checkouts > 0 {
            SlotState::CheckedOut
        } else {
            SlotState::Idle
        }
    }
}
