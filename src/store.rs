//! Facade wiring the storage driver, backup manager, slot pool, consistency pipeline
//! and concurrency guard into one handle.
//!
//! Responsibilities:
//! - Own the lifecycle of the pool and its sweeper thread (`open` / `close`).
//! - Expose the editor-facing operations (`checkout`, `commit`, `delete`, ...).
//! - Expose administrative operations (`diagnose`, `repair`, backups, import/export).

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use crate::backup::{BackupEntry, BackupManager};
use crate::consistency::ConsistencyPipeline;
use crate::diff::{StateDiff, diff};
use crate::error::Result;
use crate::format::AnnotationFormat;
use crate::guard::{Checkout, ConcurrencyGuard, SlotState};
use crate::layout::Layout;
use crate::pool::{
    EntryValidator, FingerprintValidator, PoolStats, PoolSweeper, SchemaSource, SlotPool,
    SweepReport,
};
use crate::storage::{FsStorage, StorageDriver};
use crate::types::{
    AnnotationState, AnnotatorId, DiagnosticReport, DocumentId, RepairOptions, RepairReport,
    RepairReportStatus, RepairStatus, Slot, SlotMetadata, StoreOptions, VersionStamp,
};

pub struct AnnotationStore {
    options: StoreOptions,
    layout: Layout,
    driver: Arc<dyn StorageDriver>,
    pipeline: Arc<ConsistencyPipeline>,
    pool: Arc<SlotPool>,
    backups: Arc<BackupManager>,
    guard: ConcurrencyGuard,
    sweeper: Option<PoolSweeper>,
}

impl AnnotationStore {
    /// Open (creating the root directory if needed) with the default entry validator.
    pub fn open(options: StoreOptions, schema: Arc<dyn SchemaSource>) -> Result<Self> {
        let validator = Box::new(FingerprintValidator::new(schema.clone()));
        Self::open_with_validator(options, schema, validator)
    }

    pub fn open_with_validator(
        options: StoreOptions,
        schema: Arc<dyn SchemaSource>,
        validator: Box<dyn EntryValidator>,
    ) -> Result<Self> {
        options.validate()?;
        fs::create_dir_all(&options.root)?;

        let layout = Layout::new(&options.root);
        let driver: Arc<dyn StorageDriver> = Arc::new(FsStorage::new(layout.clone()));
        let pipeline = Arc::new(ConsistencyPipeline::new(options.checks.clone()));
        let pool = Arc::new(SlotPool::with_validator(
            driver.clone(),
            pipeline.clone(),
            schema,
            validator,
            options.pool.clone(),
        ));
        let backups = Arc::new(BackupManager::new(
            layout.clone(),
            driver.clone(),
            options.retention.clone(),
        ));
        let guard = ConcurrencyGuard::new(
            layout.clone(),
            driver.clone(),
            pool.clone(),
            backups.clone(),
            pipeline.clone(),
        );
        let sweeper = match options.pool.sweep_interval() {
            Some(interval) => Some(PoolSweeper::spawn(pool.clone(), interval)?),
            None => None,
        };

        tracing::info!(
            target = "annostore::store",
            root = %options.root.display(),
            checks = options.checks.len(),
            max_entries = options.pool.max_entries,
            sweeper = sweeper.is_some(),
            "annotation store opened"
        );
        Ok(Self {
            options,
            layout,
            driver,
            pipeline,
            pool,
            backups,
            guard,
            sweeper,
        })
    }

    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Working snapshot of a persisted slot. `NotFound` when nothing is persisted yet;
    /// use [`AnnotationStore::create`] then.
    pub fn checkout(&self, slot: &Slot) -> Result<Checkout> {
        self.guard.checkout(slot)
    }

    /// Working snapshot for a slot with no persisted state. Its first commit expects
    /// [`VersionStamp::UNPERSISTED`].
    pub fn create(&self, slot: &Slot, state: AnnotationState) -> Result<Checkout> {
        let fingerprint = self.pool.current_fingerprint(slot.document)?;
        Ok(Checkout::create(slot.clone(), state, fingerprint))
    }

    pub fn commit(
        &self,
        slot: &Slot,
        state: Arc<AnnotationState>,
        expected: VersionStamp,
        context: &str,
    ) -> Result<VersionStamp> {
        self.guard.commit(slot, state, expected, context)
    }

    pub fn commit_checkout(&self, checkout: &mut Checkout, context: &str) -> Result<VersionStamp> {
        self.guard.commit_checkout(checkout, context)
    }

    pub fn delete(&self, slot: &Slot) -> Result<bool> {
        self.guard.delete(slot)
    }

    /// Delete every annotator's state of `document`. Backups stay behind, subject to
    /// retention, so every deleted slot remains restorable. Returns the number of slots
    /// removed.
    pub fn delete_document(&self, document: DocumentId) -> Result<usize> {
        let mut removed = 0;
        for annotator in self.layout.annotators(document)? {
            let slot = Slot::new(document, annotator);
            if self.guard.delete(&slot)? {
                removed += 1;
            }
            match fs::remove_file(self.layout.lock_path(&slot)?) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.pool.invalidate_document(document)?;
        // The directory only goes once no backups are left in it.
        match fs::remove_dir(self.layout.document_dir(document)) {
            Ok(()) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty
                ) => {}
            Err(err) => return Err(err.into()),
        }
        tracing::info!(target = "annostore::store", %document, removed, "document deleted");
        Ok(removed)
    }

    pub fn exists(&self, slot: &Slot) -> Result<bool> {
        self.driver.exists(slot)
    }

    pub fn metadata(&self, slot: &Slot) -> Result<Option<SlotMetadata>> {
        self.driver.metadata(slot)
    }

    /// Annotators with persisted state for `document`.
    pub fn annotators(&self, document: DocumentId) -> Result<Vec<AnnotatorId>> {
        self.layout.annotators(document)
    }

    #[must_use]
    pub fn slot_state(&self, slot: &Slot) -> SlotState {
        self.guard.slot_state(slot)
    }

    /// Every configured check against the persisted state of `slot`. Read-only.
    pub fn diagnose(&self, slot: &Slot) -> Result<DiagnosticReport> {
        let checkout = self.guard.checkout(slot)?;
        Ok(DiagnosticReport {
            slot: slot.clone(),
            version: checkout.stamp(),
            diagnostics: self.pipeline.run_all(checkout.state()),
        })
    }

    /// Run the paired repairs on the persisted state of `slot` and, unless this is a
    /// dry run, commit the result through the guard so a backup precedes it. Nothing is
    /// written while blocking errors remain.
    pub fn repair(&self, slot: &Slot, options: &RepairOptions) -> Result<RepairReport> {
        let checkout = self.guard.checkout(slot)?;
        let mut state = checkout.state().clone();
        let (outcomes, diagnostics) = self.pipeline.repair(&mut state, options);

        let untouched = outcomes
            .iter()
            .all(|outcome| outcome.status == RepairStatus::Clean);
        let changed = outcomes.iter().any(|outcome| outcome.changes > 0);
        let blocking = diagnostics
            .iter()
            .any(|diagnostic| self.pipeline.is_blocking(diagnostic));
        let status = if untouched && diagnostics.is_empty() {
            RepairReportStatus::Clean
        } else if blocking {
            RepairReportStatus::Failed
        } else if diagnostics.is_empty() {
            RepairReportStatus::Healed
        } else {
            RepairReportStatus::Partial
        };

        let committed = if options.dry_run || !changed || status == RepairReportStatus::Failed {
            None
        } else {
            Some(
                self.guard
                    .commit(slot, Arc::new(state), checkout.stamp(), "repair")?,
            )
        };
        tracing::info!(
            target = "annostore::repair",
            %slot,
            ?status,
            dry_run = options.dry_run,
            remaining = diagnostics.len(),
            committed = ?committed.map(|stamp| stamp.0),
            "repair finished"
        );
        Ok(RepairReport {
            status,
            outcomes,
            diagnostics,
            committed,
        })
    }

    /// Backups of `slot`, oldest first.
    pub fn list_backups(&self, slot: &Slot) -> Result<Vec<BackupEntry>> {
        self.backups.list(slot)
    }

    /// Make a backup the current state of its slot. The state being replaced is itself
    /// backed up first.
    pub fn restore_backup(&self, entry: &BackupEntry, context: &str) -> Result<VersionStamp> {
        let bytes = self.backups.read(entry)?;
        self.guard.import_native(&entry.slot, &bytes, context)
    }

    /// Write the persisted state of `slot` to `out` in `format`. Returns the byte count.
    pub fn export(
        &self,
        slot: &Slot,
        format: &dyn AnnotationFormat,
        out: &mut dyn Write,
    ) -> Result<u64> {
        let checkout = self.guard.checkout(slot)?;
        let bytes = format.encode(checkout.state())?;
        out.write_all(&bytes)?;
        out.flush()?;
        tracing::debug!(
            target = "annostore::store",
            %slot,
            format = format.name(),
            bytes = bytes.len(),
            "slot exported"
        );
        Ok(bytes.len() as u64)
    }

    /// Copy the raw persisted bytes of `slot` to `out`, stamp included.
    pub fn export_native(&self, slot: &Slot, out: &mut dyn Write) -> Result<u64> {
        self.driver.export_to(slot, out)
    }

    /// Replace the state of `slot` with one read from `input` in `format`. The current
    /// state is backed up and the imported one must pass the save-time checks.
    pub fn import(
        &self,
        slot: &Slot,
        format: &dyn AnnotationFormat,
        input: &mut dyn Read,
        context: &str,
    ) -> Result<VersionStamp> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let state = format.decode(&bytes)?;
        self.guard.overwrite(slot, Arc::new(state), context)
    }

    /// The schema of `document`'s project changed: drop its cached parses now instead
    /// of waiting for validation to catch them.
    pub fn schema_changed(&self, document: DocumentId) -> Result<usize> {
        self.pool.invalidate_document(document)
    }

    /// What a checkout changed since it was taken or last committed.
    #[must_use]
    pub fn pending_changes(&self, checkout: &Checkout) -> StateDiff {
        diff(checkout.base(), checkout.state())
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Run one pool sweep now, independent of the background sweeper.
    pub fn sweep(&self) -> SweepReport {
        self.pool.sweep()
    }

    /// Stop the sweeper and release the store. Dropping the store does the same.
    pub fn close(mut self) {
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
        let stats = self.pool.stats();
        tracing::info!(
            target = "annostore::store",
            root = %self.options.root.display(),
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            "annotation store closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::format::JsonFormat;
    use crate::types::{CheckKind, Record, RecordId, SchemaFingerprint, Severity};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> AnnotationStore {
        let options = StoreOptions::new(dir.path()).sweep_interval_ms(0);
        AnnotationStore::open(options, Arc::new(SchemaFingerprint::of(b"v1"))).expect("open")
    }

    fn sentence() -> AnnotationState {
        let mut state = AnnotationState::new("Alice met Bob.");
        let alice = state.add(Record::span("NamedEntity", 0, 5));
        let bob = state.add(Record::span("NamedEntity", 10, 13));
        state.add(Record::relation("Coreference", alice, bob));
        state
    }

    #[test]
    fn create_commit_checkout_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let slot = Slot::new(42, "alice");
        let mut created = store.create(&slot, sentence()).expect("create");
        assert_eq!(store.commit_checkout(&mut created, "save").expect("commit"), VersionStamp(1));

        let checkout = store.checkout(&slot).expect("checkout");
        assert_eq!(checkout.stamp(), VersionStamp(1));
        assert_eq!(checkout.state(), &sentence());
        assert!(store.pending_changes(&checkout).is_empty());
        store.close();
    }

    #[test]
    fn repair_heals_and_commits_after_a_backup() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let slot = Slot::new(1, "curator");
        let mut corrupt = sentence();
        corrupt.index_mut().push(RecordId(0));
        // Corrupt states cannot be committed, so write the bytes directly.
        let bytes = crate::io::encode_state(&corrupt, VersionStamp(1), SchemaFingerprint::of(b"v1"))
            .expect("encode");
        store.driver.write(&slot, &bytes).expect("raw write");

        let report = store.diagnose(&slot).expect("diagnose");
        assert_eq!(report.count(Severity::Error), 1);
        assert_eq!(report.diagnostics[0].check, CheckKind::DuplicateIndexEntries);

        let dry = store
            .repair(&slot, &RepairOptions { dry_run: true, only: None })
            .expect("dry run");
        assert_eq!(dry.status, RepairReportStatus::Healed);
        assert!(dry.committed.is_none());
        assert!(store.list_backups(&slot).expect("list").is_empty());

        let report = store.repair(&slot, &RepairOptions::default()).expect("repair");
        assert_eq!(report.status, RepairReportStatus::Healed);
        assert_eq!(report.committed, Some(VersionStamp(2)));
        assert_eq!(store.list_backups(&slot).expect("list").len(), 1);
        assert!(store.diagnose(&slot).expect("diagnose").is_clean());
    }

    #[test]
    fn json_export_import_between_slots() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let source = Slot::new(3, "alice");
        let target = Slot::new(3, "curator");
        store
            .commit(&source, Arc::new(sentence()), VersionStamp::UNPERSISTED, "save")
            .expect("commit");

        let mut exported = Vec::new();
        store
            .export(&source, &JsonFormat::default(), &mut exported)
            .expect("export");
        let stamp = store
            .import(&target, &JsonFormat::default(), &mut exported.as_slice(), "import")
            .expect("import");
        assert_eq!(stamp, VersionStamp(1));
        assert_eq!(store.checkout(&target).expect("checkout").state(), &sentence());
    }

    #[test]
    fn delete_document_removes_every_annotator_but_keeps_backups() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        for user in ["alice", "bob"] {
            store
                .commit(
                    &Slot::new(8, user),
                    Arc::new(sentence()),
                    VersionStamp::UNPERSISTED,
                    "save",
                )
                .expect("commit");
        }
        assert_eq!(store.annotators(DocumentId(8)).expect("list").len(), 2);
        assert_eq!(store.delete_document(DocumentId(8)).expect("delete"), 2);
        assert!(store.annotators(DocumentId(8)).expect("list").is_empty());
        let alice = Slot::new(8, "alice");
        assert!(!store.layout().lock_path(&alice).expect("lock path").exists());
        assert_eq!(store.list_backups(&alice).expect("backups").len(), 1);
        assert!(matches!(
            store.checkout(&Slot::new(8, "alice")),
            Err(StoreError::NotFound { .. })
        ));
    }
}
