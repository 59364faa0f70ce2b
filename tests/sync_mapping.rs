//! Integration test for the synchronizer store's remote-id/local-id mapping
//! lifecycle: record, resolve both directions, update, and remove, all
//! observed across separate transactions the way a real sync run would use
//! them.

use sink_core::{AccessMode, Config, Environment, Identifier, SyncMode, SynchronizerStore};
use tempfile::tempdir;

fn env() -> (tempfile::TempDir, Environment) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mail.sink");
    (dir, Environment::open(&path, &Config::default()).unwrap())
}

#[test]
fn test_record_then_resolve_both_directions() {
    let (_dir, env) = env();
    let store = SynchronizerStore::new("mail");
    let local = Identifier::new();

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    store.record_remote_id(&txn, local, b"imap-uid-42").unwrap();
    txn.commit().unwrap();

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    assert_eq!(store.resolve_remote_id(&txn, b"imap-uid-42").unwrap(), Some(local));
    assert_eq!(store.resolve_local_id(&txn, local).unwrap(), Some(b"imap-uid-42".to_vec()));
}

#[test]
fn test_resolve_remote_id_is_idempotent_across_transactions() {
    let (_dir, env) = env();
    let store = SynchronizerStore::new("mail");

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    let first = store.resolve_remote_id(&txn, b"imap-uid-7").unwrap().unwrap();
    txn.commit().unwrap();

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    let second = store.resolve_remote_id(&txn, b"imap-uid-7").unwrap().unwrap();
    txn.commit().unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_update_remote_id_replaces_the_prior_mapping_in_both_directions() {
    let (_dir, env) = env();
    let store = SynchronizerStore::new("mail");
    let local = Identifier::new();

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    store.record_remote_id(&txn, local, b"old-uid").unwrap();
    txn.commit().unwrap();

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    store.update_remote_id(&txn, local, b"new-uid").unwrap();
    txn.commit().unwrap();

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    assert_eq!(store.resolve_local_id(&txn, local).unwrap(), Some(b"new-uid".to_vec()));
    assert_eq!(store.resolve_remote_id(&txn, b"new-uid").unwrap(), Some(local));
    // The old remote id no longer resolves to this local id; resolving it
    // again now mints a fresh, distinct local identifier.
    let reresolved = store.resolve_remote_id(&txn, b"old-uid").unwrap().unwrap();
    assert_ne!(reresolved, local);
}

#[test]
fn test_remove_remote_id_clears_both_directions() {
    let (_dir, env) = env();
    let store = SynchronizerStore::new("mail");
    let local = Identifier::new();

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    store.record_remote_id(&txn, local, b"imap-uid-99").unwrap();
    store.remove_remote_id(&txn, local, b"imap-uid-99").unwrap();
    txn.commit().unwrap();

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    assert_eq!(store.resolve_local_id(&txn, local).unwrap(), None);
    // Resolving the now-unmapped remote id mints a new local identifier
    // rather than returning the removed one.
    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    let reresolved = store.resolve_remote_id(&txn, b"imap-uid-99").unwrap().unwrap();
    assert_ne!(reresolved, local);
}
