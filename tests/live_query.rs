//! Integration test for a live `reduce(folder, max<date>).limit(...)` query
//! as its underlying thread count grows: every newly represented thread
//! must surface as exactly one `Added` event, and a thread whose
//! representative changes must surface as a single coalesced `Modified`
//! event rather than one per revision.
//!
//! `QueryRunner::diff`/`QueryRunner::advance_live_query` do the actual
//! revision-range replay and added/modified/removed diffing (spec.md §4.9
//! "Live mode"); this test only drives commits and drains the resulting
//! events.

use std::collections::HashMap;

use sink_core::pipeline::Pipeline;
use sink_core::query::{LiveQuery, LiveResultSet, RevisionNotifier, Selector};
use sink_core::{
    AccessMode, ChangeEvent, Config, EntityRecord, EntityStore, Environment, Identifier, Operation,
    PropertyValue, Query, QueryRunner, Reduce, SyncMode, TypeIndex,
};
use tempfile::tempdir;

const INITIAL_THREADS: usize = 100;
const ADDED_THREADS: usize = 100;
const MODIFIED_THREADS: usize = 50;

fn mail(folder: &str, date: i64) -> EntityRecord {
    let mut properties = HashMap::new();
    properties.insert("folder".to_string(), PropertyValue::Text(folder.to_string()));
    properties.insert("date".to_string(), PropertyValue::DateTime(Some(date)));
    EntityRecord::new(Operation::Create, properties)
}

fn reduce_query() -> Query {
    let mut query = Query::new("mail");
    query.reduce = Some(Reduce { property: "folder".into(), selector: Selector::MaxOf("date".into()) });
    query.limit = Some(1_000);
    query
}

#[test]
fn test_live_query_coalesces_growth_into_added_and_modified_events() {
    let dir = tempdir().unwrap();
    let env = Environment::open(dir.path().join("mail.sink"), &Config::default()).unwrap();
    let store = EntityStore::new("mail", Pipeline::new());
    let type_index = TypeIndex::new("mail");
    let notifier = RevisionNotifier::new();

    // Initial result set: 100 single-message threads.
    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    for t in 0..INITIAL_THREADS {
        store.add(&txn, Identifier::new(), mail(&format!("thread-{t}"), 1_700_000_000)).unwrap();
    }
    txn.commit().unwrap();

    let query = reduce_query();
    let runner = QueryRunner::new(&store, &type_index, None);

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    let initial_results = runner.execute(&txn, &query).unwrap();
    assert_eq!(initial_results.len(), INITIAL_THREADS);
    let mut seen = LiveResultSet::seed(&query, initial_results.clone());
    drop(txn);

    let mut total_added = initial_results.len();
    let mut total_modified = 0;

    let mut live = LiveQuery::subscribe(&notifier, 0);

    // Grow to 200 threads: 100 brand-new threads, plus a newer message in
    // 50 of the existing ones (changing their representative).
    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    for t in 0..ADDED_THREADS {
        store.add(&txn, Identifier::new(), mail(&format!("new-thread-{t}"), 1_700_000_000)).unwrap();
    }
    for t in 0..MODIFIED_THREADS {
        store.add(&txn, Identifier::new(), mail(&format!("thread-{t}"), 1_700_000_100)).unwrap();
    }
    txn.commit().unwrap();
    notifier.notify(150 + MODIFIED_THREADS as u64);

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    let pushed = runner.advance_live_query(&txn, &query, &mut live, &mut seen).unwrap();
    assert!(pushed > 0);

    let mut added = 0;
    let mut modified = 0;
    while let Some(event) = live.next_event() {
        match event {
            ChangeEvent::Added(_) => added += 1,
            ChangeEvent::Modified(_) => modified += 1,
            ChangeEvent::Removed(_) => panic!("no thread should be removed by growth alone"),
            ChangeEvent::InitialResultSetComplete => {}
        }
    }
    total_added += added;
    total_modified += modified;

    assert_eq!(total_added, INITIAL_THREADS + ADDED_THREADS);
    assert_eq!(total_modified, MODIFIED_THREADS);
}

#[test]
fn test_live_query_on_a_non_reduce_query_emits_one_event_per_touched_entity() {
    let dir = tempdir().unwrap();
    let env = Environment::open(dir.path().join("mail.sink"), &Config::default()).unwrap();
    let store = EntityStore::new("mail", Pipeline::new());
    let type_index = TypeIndex::new("mail");
    let notifier = RevisionNotifier::new();
    let runner = QueryRunner::new(&store, &type_index, None);
    let query = Query::new("mail");

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    let mut seen = LiveResultSet::seed(&query, runner.execute(&txn, &query).unwrap());
    drop(txn);

    let mut live = LiveQuery::subscribe(&notifier, 0);

    let id = Identifier::new();
    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    let r1 = store.add(&txn, id, mail("inbox", 1)).unwrap();
    txn.commit().unwrap();
    notifier.notify(r1.value());

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    runner.advance_live_query(&txn, &query, &mut live, &mut seen).unwrap();
    drop(txn);
    assert!(matches!(live.next_event(), Some(ChangeEvent::Added(result)) if result.identifier == id));
    assert!(live.next_event().is_none());

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    let r2 = store.modify(&txn, id, r1, mail("archive", 1), &[]).unwrap();
    txn.commit().unwrap();
    notifier.notify(r2.value());

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    runner.advance_live_query(&txn, &query, &mut live, &mut seen).unwrap();
    drop(txn);
    assert!(matches!(live.next_event(), Some(ChangeEvent::Modified(result)) if result.identifier == id));
    assert!(live.next_event().is_none());

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    let r3 = store.remove(&txn, id).unwrap();
    txn.commit().unwrap();
    notifier.notify(r3.value());

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    runner.advance_live_query(&txn, &query, &mut live, &mut seen).unwrap();
    assert!(matches!(live.next_event(), Some(ChangeEvent::Removed(removed)) if removed == id));
    assert!(live.next_event().is_none());
}
