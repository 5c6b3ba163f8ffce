//! Cache of parsed annotation states keyed by slot.
//!
//! Each slot has its own cell guarded by a timed mutex. The lock is held while an entry
//! is validated or loaded and for the whole duration of a commit, which serializes
//! writers on the same slot without blocking other slots. The map of cells is only held
//! long enough to find or insert a cell.
//!
//! Callers never mutate a cached state in place: entries share an `Arc<AnnotationState>`
//! and modifications go through copy-on-write in the concurrency guard.

pub mod sweeper;
pub mod validator;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::consistency::ConsistencyPipeline;
use crate::error::{Result, StoreError};
use crate::io::codec;
use crate::storage::StorageDriver;
use crate::types::{AnnotationState, DocumentId, PoolOptions, SchemaFingerprint, Slot, VersionStamp};

pub use sweeper::PoolSweeper;
pub use validator::{EntryValidator, FingerprintValidator, SchemaRegistry, SchemaSource};

/// A cached, parsed annotation state plus its validity metadata.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub slot: Slot,
    pub state: Arc<AnnotationState>,
    /// Schema fingerprint in effect when the state was loaded or committed.
    pub fingerprint: SchemaFingerprint,
    /// Persisted version the state corresponds to.
    pub stamp: VersionStamp,
    pub deleted: bool,
    pub last_access: Instant,
}

#[derive(Debug, Default)]
struct SlotCell {
    entry: Arc<Mutex<Option<PoolEntry>>>,
    checkouts: AtomicUsize,
    committing: AtomicBool,
}

/// Outstanding use of a slot, as seen by the concurrency guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotActivity {
    pub checkouts: usize,
    pub committing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub entries: usize,
    pub checked_out: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub evicted: usize,
    /// Cells skipped because a load or commit held their lock.
    pub busy: usize,
}

/// Handed out with every acquired entry; counts as an outstanding checkout until dropped.
#[derive(Debug)]
pub struct PoolLease {
    slot: Slot,
    cell: Arc<SlotCell>,
}

impl PoolLease {
    fn new(slot: &Slot, cell: Arc<SlotCell>) -> Self {
        cell.checkouts.fetch_add(1, Ordering::AcqRel);
        Self {
            slot: slot.clone(),
            cell,
        }
    }

    #[must_use]
    pub fn slot(&self) -> &Slot {
        &self.slot
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.cell.checkouts.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(target = "annostore::pool", slot = %self.slot, "lease released");
    }
}

/// Exclusive hold on a slot for the duration of a commit or delete.
pub struct SlotGuard {
    slot: Slot,
    cell: Arc<SlotCell>,
    entry: ArcMutexGuard<RawMutex, Option<PoolEntry>>,
}

impl SlotGuard {
    #[must_use]
    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    #[must_use]
    pub fn cached(&self) -> Option<&PoolEntry> {
        self.entry.as_ref()
    }

    /// Replace the cached entry with a freshly committed state.
    pub fn install(
        &mut self,
        state: Arc<AnnotationState>,
        stamp: VersionStamp,
        fingerprint: SchemaFingerprint,
    ) {
        *self.entry = Some(PoolEntry {
            slot: self.slot.clone(),
            state,
            fingerprint,
            stamp,
            deleted: false,
            last_access: Instant::now(),
        });
    }

    /// Drop the cached entry. Returns whether there was one.
    pub fn evict(&mut self) -> bool {
        self.entry.take().is_some()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.cell.committing.store(false, Ordering::Release);
    }
}

pub struct SlotPool {
    driver: Arc<dyn StorageDriver>,
    pipeline: Arc<ConsistencyPipeline>,
    schema: Arc<dyn SchemaSource>,
    validator: Box<dyn EntryValidator>,
    options: PoolOptions,
    cells: Mutex<HashMap<Slot, Arc<SlotCell>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SlotPool {
    /// Pool validating entries with [`FingerprintValidator`] over `schema`.
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        pipeline: Arc<ConsistencyPipeline>,
        schema: Arc<dyn SchemaSource>,
        options: PoolOptions,
    ) -> Self {
        let validator = Box::new(FingerprintValidator::new(schema.clone()));
        Self::with_validator(driver, pipeline, schema, validator, options)
    }

    pub fn with_validator(
        driver: Arc<dyn StorageDriver>,
        pipeline: Arc<ConsistencyPipeline>,
        schema: Arc<dyn SchemaSource>,
        validator: Box<dyn EntryValidator>,
        options: PoolOptions,
    ) -> Self {
        Self {
            driver,
            pipeline,
            schema,
            validator,
            options,
            cells: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn current_fingerprint(&self, document: DocumentId) -> Result<SchemaFingerprint> {
        self.schema.fingerprint(document)
    }

    /// Return a valid entry for `slot`, loading it from storage on a miss or after
    /// evicting a stale one. Fails with `NotFound` when nothing is persisted.
    pub fn acquire(&self, slot: &Slot) -> Result<(PoolEntry, PoolLease)> {
        let cell = self.cell(slot);
        let mut guard = self.lock_cell(slot, &cell)?;

        if let Some(cached) = guard.as_mut() {
            if self.is_valid(cached)? {
                cached.last_access = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                let entry = cached.clone();
                drop(guard);
                tracing::trace!(target = "annostore::pool", %slot, version = %entry.stamp, "pool hit");
                return Ok((entry, PoolLease::new(slot, cell)));
            }
            tracing::debug!(
                target = "annostore::pool",
                %slot,
                version = %cached.stamp,
                deleted = cached.deleted,
                "evicting stale pool entry"
            );
            *guard = None;
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        let entry = self.load(slot)?;
        *guard = Some(entry.clone());
        drop(guard);
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.enforce_capacity();
        Ok((entry, PoolLease::new(slot, cell)))
    }

    /// Give a lease back. Dropping the lease has the same effect.
    pub fn release(&self, lease: PoolLease) {
        drop(lease);
    }

    /// Take the slot's lock for a commit. Waits at most `lock_timeout_ms`.
    pub fn lock_slot(&self, slot: &Slot) -> Result<SlotGuard> {
        let cell = self.cell(slot);
        let entry = self.lock_cell(slot, &cell)?;
        cell.committing.store(true, Ordering::Release);
        Ok(SlotGuard {
            slot: slot.clone(),
            cell,
            entry,
        })
    }

    /// Drop the cached entry for `slot`. Returns whether one was cached.
    pub fn invalidate(&self, slot: &Slot) -> Result<bool> {
        let Some(cell) = self.cells.lock().get(slot).cloned() else {
            return Ok(false);
        };
        let mut guard = self.lock_cell(slot, &cell)?;
        let evicted = guard.take().is_some();
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(target = "annostore::pool", %slot, "pool entry invalidated");
        }
        Ok(evicted)
    }

    /// Flag the cached entry as deleted so validation rejects it.
    pub fn mark_deleted(&self, slot: &Slot) -> Result<bool> {
        let Some(cell) = self.cells.lock().get(slot).cloned() else {
            return Ok(false);
        };
        let mut guard = self.lock_cell(slot, &cell)?;
        Ok(match guard.as_mut() {
            Some(entry) => {
                entry.deleted = true;
                true
            }
            None => false,
        })
    }

    /// Drop every cached entry of `document`. Returns the number evicted.
    pub fn invalidate_document(&self, document: DocumentId) -> Result<usize> {
        let cells: Vec<(Slot, Arc<SlotCell>)> = self
            .cells
            .lock()
            .iter()
            .filter(|(slot, _)| slot.document == document)
            .map(|(slot, cell)| (slot.clone(), cell.clone()))
            .collect();
        let mut evicted = 0;
        for (slot, cell) in cells {
            if self.lock_cell(&slot, &cell)?.take().is_some() {
                evicted += 1;
            }
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        tracing::debug!(target = "annostore::pool", %document, evicted, "document invalidated");
        Ok(evicted)
    }

    /// Re-validate every idle cached entry and evict the stale ones, then enforce the
    /// capacity bound. Cells whose lock is held are skipped.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for (slot, cell) in self.snapshot() {
            let Some(mut guard) = cell.entry.try_lock() else {
                report.busy += 1;
                continue;
            };
            let Some(entry) = guard.as_ref() else {
                continue;
            };
            report.examined += 1;
            let keep = match self.is_valid(entry) {
                Ok(valid) => valid,
                Err(err) => {
                    tracing::warn!(
                        target = "annostore::sweep",
                        %slot,
                        error = %err,
                        "validation failed; evicting"
                    );
                    false
                }
            };
            if !keep {
                *guard = None;
                report.evicted += 1;
            }
        }
        self.evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        report.evicted += self.enforce_capacity();
        tracing::debug!(
            target = "annostore::sweep",
            examined = report.examined,
            evicted = report.evicted,
            busy = report.busy,
            "pool sweep finished"
        );
        report
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            ..PoolStats::default()
        };
        for (_, cell) in self.snapshot() {
            stats.checked_out += cell.checkouts.load(Ordering::Acquire);
            if cell.entry.try_lock().is_none_or(|entry| entry.is_some()) {
                stats.entries += 1;
            }
        }
        stats
    }

    #[must_use]
    pub fn activity(&self, slot: &Slot) -> SlotActivity {
        self.cells
            .lock()
            .get(slot)
            .map(|cell| SlotActivity {
                checkouts: cell.checkouts.load(Ordering::Acquire),
                committing: cell.committing.load(Ordering::Acquire),
            })
            .unwrap_or_default()
    }

    /// Whether a parsed state for `slot` is currently cached. Busy slots report `false`.
    #[must_use]
    pub fn is_cached(&self, slot: &Slot) -> bool {
        self.cells
            .lock()
            .get(slot)
            .cloned()
            .and_then(|cell| cell.entry.try_lock().map(|entry| entry.is_some()))
            .unwrap_or(false)
    }

    fn cell(&self, slot: &Slot) -> Arc<SlotCell> {
        self.cells.lock().entry(slot.clone()).or_default().clone()
    }

    fn snapshot(&self) -> Vec<(Slot, Arc<SlotCell>)> {
        self.cells
            .lock()
            .iter()
            .map(|(slot, cell)| (slot.clone(), cell.clone()))
            .collect()
    }

    fn lock_cell(
        &self,
        slot: &Slot,
        cell: &SlotCell,
    ) -> Result<ArcMutexGuard<RawMutex, Option<PoolEntry>>> {
        let timeout = self.options.lock_timeout();
        cell.entry.try_lock_arc_for(timeout).ok_or_else(|| {
            tracing::warn!(target = "annostore::pool", %slot, ?timeout, "slot lock timed out");
            StoreError::PoolTimeout {
                slot: slot.clone(),
                waited: timeout,
            }
        })
    }

    /// The registered validator accepts the entry and nobody replaced the persisted
    /// bytes behind the pool (external import or restore).
    fn is_valid(&self, entry: &PoolEntry) -> Result<bool> {
        if !self.validator.validate(entry)? {
            return Ok(false);
        }
        let persisted = self.driver.metadata(&entry.slot)?.map(|meta| meta.version);
        Ok(persisted == Some(entry.stamp))
    }

    fn load(&self, slot: &Slot) -> Result<PoolEntry> {
        let started = Instant::now();
        let bytes = self.driver.read(slot)?;
        let (header, state) = codec::decode_state(&bytes)?;
        let fingerprint = self.schema.fingerprint(slot.document)?;
        if header.fingerprint != fingerprint {
            tracing::debug!(
                target = "annostore::load",
                %slot,
                persisted = %header.fingerprint,
                current = %fingerprint,
                "state was persisted under a different schema"
            );
        }
        let diagnostics = self.pipeline.check_on_load(slot, &state);
        tracing::debug!(
            target = "annostore::load",
            %slot,
            version = %header.stamp,
            bytes = bytes.len(),
            records = state.len(),
            diagnostics = diagnostics.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "slot loaded into pool"
        );
        Ok(PoolEntry {
            slot: slot.clone(),
            state: Arc::new(state),
            fingerprint,
            stamp: header.stamp,
            deleted: false,
            last_access: Instant::now(),
        })
    }

    /// Evict least recently used idle entries beyond `max_entries` and forget empty
    /// cells nobody refers to. Returns the number of entries evicted.
    fn enforce_capacity(&self) -> usize {
        let mut populated = 0;
        let mut idle = Vec::new();
        for (slot, cell) in self.snapshot() {
            let Some(guard) = cell.entry.try_lock() else {
                continue;
            };
            let Some(entry) = guard.as_ref() else {
                continue;
            };
            populated += 1;
            if cell.checkouts.load(Ordering::Acquire) == 0 {
                idle.push((entry.last_access, slot, cell.clone()));
            }
        }

        let mut evicted = 0;
        if populated > self.options.max_entries {
            idle.sort_by_key(|(last_access, _, _)| *last_access);
            for (_, slot, cell) in idle.into_iter().take(populated - self.options.max_entries) {
                if let Some(mut guard) = cell.entry.try_lock() {
                    if guard.take().is_some() {
                        evicted += 1;
                        tracing::trace!(target = "annostore::pool", %slot, "evicted over capacity");
                    }
                }
            }
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }

        self.cells.lock().retain(|_, cell| {
            Arc::strong_count(cell) > 1
                || cell.checkouts.load(Ordering::Acquire) > 0
                || cell.entry.try_lock().is_none_or(|entry| entry.is_some())
        });
        evicted
    }
}
