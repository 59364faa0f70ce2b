//! Integration test combining a full-text search term with a structured
//! equality filter: "quarterly" in the subject AND folder=inbox, the two
//! ANDed together by the query runner (spec.md §4.9 step 3).

use std::collections::HashMap;
use std::sync::Arc;

use sink_core::index::fulltext::PropertyPrefix;
use sink_core::pipeline::{DefaultIndexer, Pipeline};
use sink_core::{
    AccessMode, Comparator, Config, EntityRecord, EntityStore, Environment, FulltextIndex,
    Identifier, Operation, PropertyValue, Query, QueryRunner, SyncMode, TypeIndex,
};
use tempfile::tempdir;

fn mail(folder: &str, subject: &str) -> EntityRecord {
    let mut properties = HashMap::new();
    properties.insert("folder".to_string(), PropertyValue::Text(folder.to_string()));
    properties.insert("subject".to_string(), PropertyValue::Text(subject.to_string()));
    EntityRecord::new(Operation::Create, properties)
}

fn mail_type_index() -> TypeIndex {
    let mut idx = TypeIndex::new("mail");
    idx.add_property("folder");
    idx
}

fn mail_fulltext_index() -> FulltextIndex {
    FulltextIndex::new("mail.fulltext", vec![PropertyPrefix { property: "subject", prefix: 'S' }])
}

#[test]
fn test_fulltext_and_structured_filter_combine_as_logical_and() {
    let dir = tempdir().unwrap();
    let env = Environment::open(dir.path().join("mail.sink"), &Config::default()).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.add(Box::new(DefaultIndexer::new(Arc::new(mail_type_index()))));
    let store = EntityStore::new("mail", pipeline);
    let fulltext = mail_fulltext_index();

    let matching = Identifier::new();
    let wrong_folder = Identifier::new();
    let wrong_subject = Identifier::new();

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    store.add(&txn, matching, mail("inbox", "Quarterly report attached")).unwrap();
    fulltext.add(&txn, matching, &[("subject", "Quarterly report attached")]).unwrap();

    store.add(&txn, wrong_folder, mail("sent", "Quarterly report attached")).unwrap();
    fulltext.add(&txn, wrong_folder, &[("subject", "Quarterly report attached")]).unwrap();

    store.add(&txn, wrong_subject, mail("inbox", "Weekly standup notes")).unwrap();
    fulltext.add(&txn, wrong_subject, &[("subject", "Weekly standup notes")]).unwrap();
    txn.commit().unwrap();

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    let type_index = mail_type_index();
    let runner = QueryRunner::new(&store, &type_index, Some(&fulltext));
    let mut query = Query::new("mail");
    query.filters.push(("folder".to_string(), Comparator::Equals(PropertyValue::Text("inbox".into()))));
    query.filters.push(("subject".to_string(), Comparator::Fulltext("quarterly".into())));
    let results = runner.execute(&txn, &query).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].identifier, matching);
}

#[test]
fn test_short_term_fulltext_search_is_capped_at_500_results() {
    let dir = tempdir().unwrap();
    let env = Environment::open(dir.path().join("mail.sink"), &Config::default()).unwrap();

    let mut pipeline = Pipeline::new();
    pipeline.add(Box::new(DefaultIndexer::new(Arc::new(mail_type_index()))));
    let store = EntityStore::new("mail", pipeline);
    let fulltext = mail_fulltext_index();

    let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
    for i in 0..600 {
        let id = Identifier::new();
        let record = mail("inbox", &format!("re fw updates #{i}"));
        store.add(&txn, id, record).unwrap();
        fulltext.add(&txn, id, &[("subject", &format!("re fw updates #{i}"))]).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
    let type_index = mail_type_index();
    let runner = QueryRunner::new(&store, &type_index, Some(&fulltext));
    let mut query = Query::new("mail");
    query.filters.push(("folder".to_string(), Comparator::Equals(PropertyValue::Text("inbox".into()))));
    // "fw" is a 2-character term: capped at 500 results (`FulltextIndex::result_cap`).
    query.filters.push(("subject".to_string(), Comparator::Fulltext("fw".into())));
    let results = runner.execute(&txn, &query).unwrap();

    assert_eq!(results.len(), 500);
}
