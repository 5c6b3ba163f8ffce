//! Save-time refusal of corrupt states, configurable blocking and repair.

use std::fs;
use std::sync::Arc;

use annostore_core::{
    AnnotationState, AnnotationStore, CheckKind, CheckPolicy, Record, RepairOptions,
    RepairReportStatus, RepairStatus, SchemaFingerprint, Severity, Slot, StoreError, StoreOptions,
    VersionStamp,
};
use tempfile::TempDir;

fn schema() -> Arc<SchemaFingerprint> {
    Arc::new(SchemaFingerprint::of(b"ner"))
}

fn strict(dir: &TempDir) -> AnnotationStore {
    AnnotationStore::open(StoreOptions::new(dir.path()).sweep_interval_ms(0), schema()).unwrap()
}

fn lenient(dir: &TempDir) -> AnnotationStore {
    let checks = CheckKind::ALL
        .iter()
        .map(|check| CheckPolicy::default_for(*check).advisory())
        .collect();
    let options = StoreOptions::new(dir.path())
        .sweep_interval_ms(0)
        .checks(checks);
    AnnotationStore::open(options, schema()).unwrap()
}

/// "Alice met Bob." with a coreference whose source has been removed.
fn dangling() -> AnnotationState {
    let mut state = AnnotationState::new("Alice met Bob.");
    let alice = state.add(Record::span("NamedEntity", 0, 5));
    let bob = state.add(Record::span("NamedEntity", 10, 13));
    state.add(Record::relation("Coreference", alice, bob));
    state.remove(alice);
    state
}

#[test]
fn dangling_relation_is_refused_and_disk_is_untouched() {
    let dir = TempDir::new().unwrap();
    let store = strict(&dir);
    let slot = Slot::new(11, "alice");
    let mut checkout = store
        .create(&slot, AnnotationState::new("Alice met Bob."))
        .unwrap();
    store.commit_checkout(&mut checkout, "save").unwrap();
    let mut before = Vec::new();
    store.export_native(&slot, &mut before).unwrap();

    let err = store
        .commit(&slot, Arc::new(dangling()), VersionStamp(1), "save")
        .unwrap_err();
    let StoreError::Corruption { diagnostics, .. } = err else {
        panic!("expected corruption, got {err}");
    };
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].check, CheckKind::DanglingRelations);
    assert_eq!(diagnostics[0].severity, Severity::Error);

    // Neither the slot nor its backups changed
    let mut after = Vec::new();
    store.export_native(&slot, &mut after).unwrap();
    assert_eq!(before, after);
    assert!(store.list_backups(&slot).unwrap().is_empty());
    assert_eq!(store.metadata(&slot).unwrap().unwrap().version, VersionStamp(1));
}

#[test]
fn advisory_checks_from_a_config_file_let_the_write_through() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("annostore.json");
    let root = dir.path().join("data");
    let raw = serde_json::json!({
        "root": root,
        "pool": { "sweep_interval_ms": 0 },
        "checks": [{ "check": "dangling_relations" }]
    });
    fs::write(&config, serde_json::to_vec_pretty(&raw).unwrap()).unwrap();

    let options = StoreOptions::from_json_file(&config).unwrap();
    assert_eq!(options.checks.len(), 1);
    assert!(!options.checks[0].blocking);

    let store = AnnotationStore::open(options, schema()).unwrap();
    let slot = Slot::new(11, "bob");
    let stamp = store
        .commit(&slot, Arc::new(dangling()), VersionStamp::UNPERSISTED, "save")
        .unwrap();
    assert_eq!(stamp, VersionStamp(1));

    // Load-time checks report but never refuse
    let checkout = store.checkout(&slot).unwrap();
    assert_eq!(checkout.state(), &dangling());
}

#[test]
fn repair_heals_a_state_written_by_a_lenient_instance() {
    let dir = TempDir::new().unwrap();
    let slot = Slot::new(12, "curator");
    lenient(&dir)
        .commit(&slot, Arc::new(dangling()), VersionStamp::UNPERSISTED, "save")
        .unwrap();

    let store = strict(&dir);
    let report = store.diagnose(&slot).unwrap();
    assert_eq!(report.version, VersionStamp(1));
    assert_eq!(report.count(Severity::Error), 1);

    // Dry run: same verdict, nothing written
    let dry = store
        .repair(
            &slot,
            &RepairOptions {
                dry_run: true,
                only: None,
            },
        )
        .unwrap();
    assert_eq!(dry.status, RepairReportStatus::Healed);
    assert_eq!(dry.committed, None);
    assert_eq!(store.metadata(&slot).unwrap().unwrap().version, VersionStamp(1));

    let report = store.repair(&slot, &RepairOptions::default()).unwrap();
    assert_eq!(report.status, RepairReportStatus::Healed);
    assert_eq!(report.committed, Some(VersionStamp(2)));
    let outcome = report
        .outcomes
        .iter()
        .find(|outcome| outcome.check == CheckKind::DanglingRelations)
        .unwrap();
    assert_eq!(outcome.status, RepairStatus::Repaired);
    assert_eq!(outcome.changes, 1);

    // The corrupt version survives as a backup
    let backups = store.list_backups(&slot).unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].stamp, VersionStamp(1));

    let healed = store.checkout(&slot).unwrap();
    assert_eq!(healed.state().len(), 1);
    assert!(store.diagnose(&slot).unwrap().is_clean());
}

#[test]
fn excluded_repairs_leave_warnings_and_report_partial() {
    let dir = TempDir::new().unwrap();
    let store = strict(&dir);
    let slot = Slot::new(13, "alice");
    let mut state = AnnotationState::new("stray token");
    state.add(Record::token(0, 5));
    state.add_unindexed(Record::token(6, 11));

    // Orphans are warnings and never block a save
    store
        .commit(&slot, Arc::new(state), VersionStamp::UNPERSISTED, "save")
        .unwrap();

    let report = store
        .repair(
            &slot,
            &RepairOptions {
                dry_run: false,
                only: Some(vec![CheckKind::DuplicateIndexEntries]),
            },
        )
        .unwrap();
    assert_eq!(report.status, RepairReportStatus::Partial);
    assert_eq!(report.committed, None);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].check, CheckKind::OrphanedRecords);
    let outcome = report
        .outcomes
        .iter()
        .find(|outcome| outcome.check == CheckKind::OrphanedRecords)
        .unwrap();
    assert_eq!(outcome.status, RepairStatus::NoRepair);
}
