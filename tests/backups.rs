//! Backup-before-write ordering, retention and restore.

use std::fs;
use std::sync::Arc;

use annostore_core::{
    AnnotationState, AnnotationStore, NativeFormat, Record, RetentionPolicy, SchemaFingerprint,
    Slot, StoreOptions, VersionStamp,
};
use tempfile::TempDir;

fn open(dir: &TempDir, retention: RetentionPolicy) -> AnnotationStore {
    let options = StoreOptions::new(dir.path())
        .sweep_interval_ms(0)
        .retention(retention);
    AnnotationStore::open(options, Arc::new(SchemaFingerprint::of(b"v1"))).unwrap()
}

fn persisted_bytes(store: &AnnotationStore, slot: &Slot) -> Vec<u8> {
    let mut bytes = Vec::new();
    store.export_native(slot, &mut bytes).unwrap();
    bytes
}

#[test]
fn each_commit_is_preceded_by_a_backup_of_the_previous_bytes() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, RetentionPolicy::keep_last(10));
    let slot = Slot::new(5, "alice");
    let mut checkout = store
        .create(&slot, AnnotationState::new("The quick brown fox"))
        .unwrap();
    store.commit_checkout(&mut checkout, "save").unwrap();
    assert!(store.list_backups(&slot).unwrap().is_empty());

    for (begin, end) in [(0, 3), (4, 9), (10, 15)] {
        let before = persisted_bytes(&store, &slot);
        let previous = checkout.stamp();
        checkout.state_mut().add(Record::token(begin, end));
        store.commit_checkout(&mut checkout, "save").unwrap();

        let newest = store.list_backups(&slot).unwrap().pop().unwrap();
        assert_eq!(newest.stamp, previous);
        assert_eq!(fs::read(&newest.path).unwrap(), before);
    }
}

#[test]
fn retention_keeps_exactly_n_after_n_plus_one_commits() {
    let dir = TempDir::new().unwrap();
    let limit = 3;
    let store = open(&dir, RetentionPolicy::keep_last(limit));
    let slot = Slot::new(5, "alice");
    let mut checkout = store.create(&slot, AnnotationState::new("abcdef")).unwrap();

    // The first commit has nothing to back up, so N + 2 commits yield N + 1 backups
    for end in 1..=(limit as u32 + 2) {
        checkout.state_mut().add(Record::token(0, end));
        store.commit_checkout(&mut checkout, "save").unwrap();
    }

    let backups = store.list_backups(&slot).unwrap();
    assert_eq!(backups.len(), limit);
    let stamps: Vec<u64> = backups.iter().map(|entry| entry.stamp.0).collect();
    assert_eq!(stamps, vec![2, 3, 4]);
}

#[test]
fn restore_brings_back_an_old_version_with_a_new_stamp() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, RetentionPolicy::default());
    let slot = Slot::new(5, "alice");
    let mut checkout = store.create(&slot, AnnotationState::new("hello world")).unwrap();
    checkout.state_mut().add(Record::token(0, 5));
    store.commit_checkout(&mut checkout, "save").unwrap();
    let original = checkout.state().clone();

    checkout.state_mut().add(Record::token(6, 11));
    store.commit_checkout(&mut checkout, "save").unwrap();

    let backup = store.list_backups(&slot).unwrap().pop().unwrap();
    assert_eq!(backup.stamp, VersionStamp(1));
    let stamp = store.restore_backup(&backup, "restore").unwrap();
    assert_eq!(stamp, VersionStamp(3));

    let restored = store.checkout(&slot).unwrap();
    assert_eq!(restored.stamp(), VersionStamp(3));
    assert_eq!(restored.state(), &original);

    // The overwritten version 2 was itself backed up before the restore
    let stamps: Vec<u64> = store
        .list_backups(&slot)
        .unwrap()
        .iter()
        .map(|entry| entry.stamp.0)
        .collect();
    assert_eq!(stamps, vec![1, 2]);

    // The stale checkout from before the restore can no longer commit
    checkout.state_mut().add(Record::token(0, 1));
    assert!(store.commit_checkout(&mut checkout, "save").unwrap_err().is_conflict());
}

#[test]
fn native_export_imports_into_another_slot() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, RetentionPolicy::default());
    let source = Slot::new(5, "alice");
    let target = Slot::new(5, "curator");
    let mut checkout = store.create(&source, AnnotationState::new("merge me")).unwrap();
    checkout.state_mut().add(Record::token(0, 5));
    store.commit_checkout(&mut checkout, "save").unwrap();

    let mut exported = Vec::new();
    store.export(&source, &NativeFormat, &mut exported).unwrap();
    let stamp = store
        .import(&target, &NativeFormat, &mut exported.as_slice(), "merge")
        .unwrap();
    assert_eq!(stamp, VersionStamp(1));
    assert_eq!(store.checkout(&target).unwrap().state(), checkout.state());
}

#[test]
fn deleting_a_document_keeps_its_backups_restorable() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir, RetentionPolicy::default());
    let slot = Slot::new(8, "alice");
    let mut checkout = store.create(&slot, AnnotationState::new("keep me")).unwrap();
    store.commit_checkout(&mut checkout, "save").unwrap();
    checkout.state_mut().add(Record::token(0, 4));
    store.commit_checkout(&mut checkout, "save").unwrap();
    let last = checkout.state().clone();
    assert_eq!(store.list_backups(&slot).unwrap().len(), 1);

    assert_eq!(store.delete_document(8.into()).unwrap(), 1);
    assert!(!store.exists(&slot).unwrap());

    // Version 1 from the second commit plus version 2 taken by the delete
    let backups = store.list_backups(&slot).unwrap();
    let stamps: Vec<u64> = backups.iter().map(|entry| entry.stamp.0).collect();
    assert_eq!(stamps, vec![1, 2]);

    let stamp = store.restore_backup(backups.last().unwrap(), "restore").unwrap();
    assert_eq!(stamp, VersionStamp(3));
    assert_eq!(store.checkout(&slot).unwrap().state(), &last);
}
