#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sink_core::{AccessMode, Config, Environment, SyncMode, SynchronizerStore};

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Resolve { remote_id: Vec<u8> },
    Update { remote_id: Vec<u8>, new_remote_id: Vec<u8> },
    Remove { remote_id: Vec<u8> },
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<FuzzOp>,
}

// Drives the bidirectional local<->remote id mapping with arbitrary byte
// strings, checking the round-trip invariant: whatever local id a remote id
// resolves to must resolve back to that same remote id.
fuzz_target!(|input: FuzzInput| {
    let dir = tempfile::tempdir().unwrap();
    let env = match Environment::open(dir.path().join("fuzz.sink"), &Config::default()) {
        Ok(env) => env,
        Err(_) => return,
    };
    let sync_store = SynchronizerStore::new("mail");

    for op in input.ops.into_iter().take(256) {
        let txn = match env.begin(AccessMode::ReadWrite, SyncMode::Fast) {
            Ok(txn) => txn,
            Err(_) => continue,
        };

        match op {
            FuzzOp::Resolve { remote_id } => {
                if remote_id.is_empty() {
                    let _ = txn.commit();
                    continue;
                }
                if let Ok(Some(local_id)) = sync_store.resolve_remote_id(&txn, &remote_id) {
                    let back = sync_store.resolve_local_id(&txn, local_id).unwrap();
                    assert_eq!(back.as_deref(), Some(remote_id.as_slice()));
                }
            }
            FuzzOp::Update { remote_id, new_remote_id } => {
                if remote_id.is_empty() || new_remote_id.is_empty() {
                    let _ = txn.commit();
                    continue;
                }
                if let Ok(Some(local_id)) = sync_store.resolve_remote_id(&txn, &remote_id) {
                    if sync_store.update_remote_id(&txn, local_id, &new_remote_id).is_ok() {
                        let back = sync_store.resolve_local_id(&txn, local_id).unwrap();
                        assert_eq!(back.as_deref(), Some(new_remote_id.as_slice()));
                    }
                }
            }
            FuzzOp::Remove { remote_id } => {
                if remote_id.is_empty() {
                    let _ = txn.commit();
                    continue;
                }
                if let Ok(Some(local_id)) = sync_store.resolve_remote_id(&txn, &remote_id) {
                    let _ = sync_store.remove_remote_id(&txn, local_id, &remote_id);
                }
            }
        }

        let _ = txn.commit();
    }

    env.close();
});
