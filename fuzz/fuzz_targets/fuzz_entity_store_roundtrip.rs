#![no_main]

use std::collections::HashMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sink_core::pipeline::Pipeline;
use sink_core::{
    AccessMode, Config, EntityRecord, EntityStore, Environment, Identifier, Operation, PropertyValue, Revision,
    SyncMode,
};

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Add { subject: String },
    Modify { index: u8, subject: String },
    Remove { index: u8 },
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<FuzzOp>,
}

fn record(subject: &str) -> EntityRecord {
    let mut properties = HashMap::new();
    properties.insert("subject".to_string(), PropertyValue::Text(subject.to_string()));
    EntityRecord::new(Operation::Create, properties)
}

// Drives add/modify/remove against a real environment and checks that the
// store never panics and that revisions strictly increase per commit.
fuzz_target!(|input: FuzzInput| {
    let dir = tempfile::tempdir().unwrap();
    let env = match Environment::open(dir.path().join("fuzz.sink"), &Config::default()) {
        Ok(env) => env,
        Err(_) => return,
    };
    let store = EntityStore::new("mail", Pipeline::new());

    let mut live: Vec<Identifier> = Vec::new();
    let mut base_revisions: HashMap<Identifier, Revision> = HashMap::new();
    let mut last_revision = 0u64;

    for op in input.ops.into_iter().take(256) {
        let txn = match env.begin(AccessMode::ReadWrite, SyncMode::Fast) {
            Ok(txn) => txn,
            Err(_) => continue,
        };

        let result = match op {
            FuzzOp::Add { subject } => {
                let id = Identifier::new();
                let outcome = store.add(&txn, id, record(&subject));
                if let Ok(revision) = &outcome {
                    live.push(id);
                    base_revisions.insert(id, *revision);
                }
                outcome
            }
            FuzzOp::Modify { index, subject } => {
                if live.is_empty() {
                    let _ = txn.commit();
                    continue;
                }
                let id = live[index as usize % live.len()];
                let base = base_revisions.get(&id).copied().unwrap_or(Revision::NONE);
                let outcome = store.modify(&txn, id, base, record(&subject), &[]);
                if let Ok(revision) = &outcome {
                    base_revisions.insert(id, *revision);
                }
                outcome
            }
            FuzzOp::Remove { index } => {
                if live.is_empty() {
                    let _ = txn.commit();
                    continue;
                }
                let position = index as usize % live.len();
                let id = live.remove(position);
                base_revisions.remove(&id);
                store.remove(&txn, id)
            }
        };

        if let Ok(revision) = result {
            assert!(revision.value() > last_revision, "revisions must strictly increase");
            last_revision = revision.value();
        }

        let _ = txn.commit();
    }

    env.close();
});
