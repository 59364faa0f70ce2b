#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sink_core::index::fulltext::PropertyPrefix;
use sink_core::{AccessMode, Config, Environment, FulltextIndex, Identifier, SyncMode};

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    documents: Vec<String>,
    query: Vec<String>,
}

fn index() -> FulltextIndex {
    FulltextIndex::new("mail.fulltext", vec![PropertyPrefix { property: "subject", prefix: 'S' }])
}

// Indexes arbitrary documents, then searches with an arbitrary query,
// checking that `search` never panics and the cap from `result_cap` holds.
fuzz_target!(|input: FuzzInput| {
    let dir = tempfile::tempdir().unwrap();
    let env = match Environment::open(dir.path().join("fuzz.sink"), &Config::default()) {
        Ok(env) => env,
        Err(_) => return,
    };
    let fulltext = index();

    let txn = match env.begin(AccessMode::ReadWrite, SyncMode::Fast) {
        Ok(txn) => txn,
        Err(_) => return,
    };
    for subject in input.documents.into_iter().take(512) {
        let id = Identifier::new();
        let _ = fulltext.add(&txn, id, &[("subject", &subject)]);
    }
    let _ = txn.commit();

    let query: String = input.query.into_iter().take(8).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        env.close();
        return;
    }

    // The longest raw word bounds the longest term the parser can produce
    // from it, so this is a safe (if loose) upper bound on `result_cap`.
    let longest = query.split_whitespace().map(|w| w.trim_matches(['"', '*', '-']).chars().count()).max().unwrap_or(0);
    let cap = FulltextIndex::result_cap(longest);

    let txn = match env.begin(AccessMode::ReadOnly, SyncMode::Fast) {
        Ok(txn) => txn,
        Err(_) => return,
    };
    if let Ok(results) = fulltext.search(&txn, Some("subject"), &query) {
        assert!(results.len() <= cap, "search returned more results than its cap allows");
    }

    env.close();
});
