//! Integration test for change-replay cursor persistence: a crash (the
//! cursor's process dying mid-replay) must not replay anything twice or
//! skip anything once the cursor is reopened and resumed.

use std::collections::HashMap;

use sink_core::pipeline::Pipeline;
use sink_core::{
    AccessMode, ChangeReplay, Config, EntityRecord, EntityStore, Environment, Identifier,
    Operation, PropertyValue, SyncMode,
};
use tempfile::tempdir;

fn mail(subject: &str) -> EntityRecord {
    let mut properties = HashMap::new();
    properties.insert("subject".to_string(), PropertyValue::Text(subject.to_string()));
    EntityRecord::new(Operation::Create, properties)
}

#[test]
fn test_cursor_resumes_exactly_where_it_left_off_across_a_restart() {
    let dir = tempdir().unwrap();
    let main_path = dir.path().join("main.sink");
    let cursor_path = dir.path().join("main.changereplay");

    let main_env = Environment::open(&main_path, &Config::default()).unwrap();
    let store = EntityStore::new("mail", Pipeline::new());

    let txn = main_env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    for i in 0..15 {
        store.add(&txn, Identifier::new(), mail(&format!("message-{i}"))).unwrap();
    }
    txn.commit().unwrap();

    // First session: replay 10 revisions, then the callback fails on the
    // 11th as if the process had crashed mid-replay.
    {
        let cursor = ChangeReplay::open(&cursor_path, &Config::default()).unwrap();
        let mut calls = 0;
        let outcome = cursor
            .replay(&main_env, |_, _, _| {
                calls += 1;
                if calls == 11 {
                    Err(sink_core::error::SinkError::GenericStorageError("simulated crash".into()))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(outcome.replayed, 10);
        assert_eq!(cursor.last_replayed_revision().unwrap().value(), 10);
    }

    // Second session: a fresh `ChangeReplay` reopened against the same
    // on-disk cursor must resume from revision 11, not from the start.
    {
        let cursor = ChangeReplay::open(&cursor_path, &Config::default()).unwrap();
        assert_eq!(cursor.last_replayed_revision().unwrap().value(), 10);

        let mut seen_subjects = Vec::new();
        let outcome = cursor
            .replay(&main_env, |_, _, record| {
                if let Some(PropertyValue::Text(subject)) = record.properties.get("subject") {
                    seen_subjects.push(subject.clone());
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(outcome.replayed, 5);
        assert_eq!(seen_subjects.len(), 5);
        assert_eq!(cursor.last_replayed_revision().unwrap().value(), 15);

        // No revision 1-10 message reappears; only 11-15 do.
        for subject in &seen_subjects {
            let index: usize = subject.strip_prefix("message-").unwrap().parse().unwrap();
            assert!(index >= 10);
        }
    }

    // A third call with nothing new to replay is a no-op.
    let cursor = ChangeReplay::open(&cursor_path, &Config::default()).unwrap();
    let outcome = cursor.replay(&main_env, |_, _, _| Ok(())).unwrap();
    assert_eq!(outcome.replayed, 0);
}
