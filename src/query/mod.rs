//! Query runner (C9): plan / materialize / filter / reduce / sort / limit /
//! emit pipeline, plus live-query change notification.
//!
//! Grounded in spec.md §4.9. Batch execution is synchronous, driven by one
//! read-only [`Transaction`]; live queries additionally register against a
//! [`RevisionNotifier`] so each commit can be replayed through the same
//! pipeline incrementally. [`QueryRunner::diff`] (backed by
//! [`LiveResultSet`]) does that replay: it walks the committed revisions
//! via `EntityStore::read_revisions` and turns them into
//! `added`/`modified`/`removed` [`ChangeEvent`]s; [`QueryRunner::advance_live_query`]
//! wires that straight into a [`LiveQuery`]'s pending notifications.

mod live;

pub use live::{ChangeEvent, LiveQuery, RevisionNotifier};

use std::collections::{HashMap, HashSet};

use crate::btree::Transaction;
use crate::error::Result;
use crate::index::fulltext::FulltextIndex;
use crate::index::type_index::{normalize, Comparator, PropertyValue, QueryFilter, TypeIndex};
use crate::key::{Identifier, Revision};
use crate::store::{EntityRecord, EntityStore};

/// How a reduced group picks its representative entity.
#[derive(Clone, Debug)]
pub enum Selector {
    /// The member with the greatest value of `property`.
    MaxOf(String),
    /// The member with the smallest value of `property`.
    MinOf(String),
}

/// Group-by-representative reduction, e.g. "one row per thread, newest
/// message represents it".
#[derive(Clone, Debug)]
pub struct Reduce {
    /// Property results are grouped by.
    pub property: String,
    /// How to pick the representative of each group.
    pub selector: Selector,
}

/// Flags affecting how a query executes.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryFlags {
    /// Register for incremental updates after the initial result set.
    pub live_query: bool,
}

/// A query against one entity type.
#[derive(Clone, Debug)]
pub struct Query {
    /// Entity type to query.
    pub entity_type: String,
    /// `(property, comparator)` filters, ANDed together.
    pub filters: Vec<(String, Comparator)>,
    /// Property to sort the final result set by, if any.
    pub sort_property: Option<String>,
    /// Properties to deserialize per result. `None` means all.
    pub requested_properties: Option<Vec<String>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Optional group-by-representative reduction.
    pub reduce: Option<Reduce>,
    /// Execution flags.
    pub flags: QueryFlags,
}

impl Query {
    /// A query with no filters, sorting, limit, or reduction.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            filters: Vec::new(),
            sort_property: None,
            requested_properties: None,
            limit: None,
            reduce: None,
            flags: QueryFlags::default(),
        }
    }
}

/// One materialized, filtered result.
#[derive(Clone, Debug)]
pub struct QueryResult {
    /// The entity's identifier.
    pub identifier: Identifier,
    /// The requested (or all) properties, as of the materializing revision.
    pub properties: HashMap<String, PropertyValue>,
    /// The properties the materializing revision actually touched (spec.md
    /// §3's "change-set"), e.g. so `--showall`-style queries can surface
    /// what a particular revision changed.
    pub change_set: Vec<String>,
    /// Set when this result represents a reduced group.
    pub group_count: Option<usize>,
}

/// Executes a query against a snapshot, applying the full plan /
/// materialize / filter / reduce / sort / limit pipeline (spec.md §4.9,
/// steps 1-6). The caller is responsible for emitting `added` events for
/// the returned set followed by `initial-result-set-complete` (step 7),
/// since that framing only matters for live queries (see [`LiveQuery`]).
pub struct QueryRunner<'a> {
    store: &'a EntityStore,
    type_index: &'a TypeIndex,
    fulltext: Option<&'a FulltextIndex>,
}

impl<'a> QueryRunner<'a> {
    /// Builds a runner for one entity type's store, type index, and
    /// (optionally) full-text index.
    pub fn new(store: &'a EntityStore, type_index: &'a TypeIndex, fulltext: Option<&'a FulltextIndex>) -> Self {
        Self { store, type_index, fulltext }
    }

    /// Runs the full pipeline and returns the final result set.
    pub fn execute(&self, txn: &Transaction<'_>, query: &Query) -> Result<Vec<QueryResult>> {
        let filters: Vec<QueryFilter<'_>> = query
            .filters
            .iter()
            .map(|(property, comparator)| QueryFilter { property, comparator })
            .collect();

        // 1. Plan.
        let plan = self.type_index.query(txn, &filters, query.sort_property.as_deref())?;
        let candidates: Vec<Identifier> = if plan.applied_filters.is_empty() && plan.identifiers.is_empty() {
            let mut all = Vec::new();
            self.store.read_all_uids(txn, |id| {
                all.push(id);
                true
            })?;
            all
        } else {
            plan.identifiers
        };

        // 2. Materialize.
        let mut results = Vec::new();
        for identifier in candidates {
            if let Some((_, record)) = self.store.latest_record(txn, identifier)? {
                if record.is_tombstone() {
                    continue;
                }
                results.push(self.materialize(identifier, &record, query));
            }
        }

        // 3. Filter (every filter not already applied by the index).
        for (property, comparator) in &query.filters {
            if plan.applied_filters.contains(property) {
                continue;
            }
            if let Comparator::Fulltext(term) = comparator {
                let Some(fulltext) = self.fulltext else { continue };
                let matches = fulltext.search(txn, Some(property), term)?;
                results.retain(|r| matches.contains(&r.identifier));
                continue;
            }
            results.retain(|r| {
                r.properties
                    .get(property)
                    .is_some_and(|value| evaluate(comparator, value))
            });
        }

        // 4. Reduce.
        let mut results = if let Some(reduce) = &query.reduce {
            apply_reduce(results, reduce)
        } else {
            results
        };

        // 5. Sort.
        if !plan.applied_sorting {
            if let Some(sort_property) = &query.sort_property {
                results.sort_by(|a, b| {
                    let a_key = a.properties.get(sort_property).map(normalize);
                    let b_key = b.properties.get(sort_property).map(normalize);
                    b_key.cmp(&a_key) // newest/greatest first, matching the index's own ordering
                });
            }
        }

        // 6. Limit.
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        Ok(results)
    }

    fn materialize(&self, identifier: Identifier, record: &EntityRecord, query: &Query) -> QueryResult {
        let properties = match &query.requested_properties {
            Some(names) => names
                .iter()
                .filter_map(|name| record.properties.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
            None => record.properties.clone(),
        };
        QueryResult { identifier, properties, change_set: record.change_set.clone(), group_count: None }
    }

    /// Evaluates every one of `query`'s filters directly against `result`,
    /// without the index-plan shortcut [`Self::execute`] uses for a full
    /// scan -- used by [`Self::diff`], which only ever has one touched
    /// record at a time and so has no candidate set to plan against.
    fn passes_filters(&self, txn: &Transaction<'_>, result: &QueryResult, query: &Query) -> Result<bool> {
        for (property, comparator) in &query.filters {
            if let Comparator::Fulltext(term) = comparator {
                let Some(fulltext) = self.fulltext else { continue };
                let matches = fulltext.search(txn, Some(property), term)?;
                if !matches.contains(&result.identifier) {
                    return Ok(false);
                }
                continue;
            }
            if !result.properties.get(property).is_some_and(|value| evaluate(comparator, value)) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Live mode (spec.md §4.9): walks every revision committed in
    /// `(lower, upper]` via [`EntityStore::read_revisions`], updates `seen`
    /// in place, and returns the `added`/`modified`/`removed` events those
    /// commits produced against `query`.
    ///
    /// Non-reduce queries re-evaluate only the identifiers actually touched
    /// in the range. Reduce queries fall back to a full re-execution once
    /// anything in the range touched this entity type, since a touched
    /// group member's representative can change the group's winner without
    /// the touched identifier itself being the one that now represents it
    /// (spec.md: "representative-changing updates within one batch are
    /// coalesced to a single `modified`").
    pub fn diff(
        &self,
        txn: &Transaction<'_>,
        query: &Query,
        lower: Revision,
        upper: Revision,
        seen: &mut LiveResultSet,
    ) -> Result<Vec<ChangeEvent>> {
        let mut touched: Vec<Identifier> = Vec::new();
        let mut touched_set = HashSet::new();
        self.store.read_revisions(txn, lower, upper, |_, identifier| {
            if touched_set.insert(identifier) {
                touched.push(identifier);
            }
            true
        })?;
        if touched.is_empty() {
            return Ok(Vec::new());
        }

        if query.reduce.is_some() {
            return self.diff_reduced(txn, query, seen);
        }

        let mut events = Vec::new();
        for identifier in touched {
            let fresh = match self.store.latest_record(txn, identifier)? {
                Some((_, record)) if !record.is_tombstone() => {
                    let result = self.materialize(identifier, &record, query);
                    if self.passes_filters(txn, &result, query)? {
                        Some(result)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            match (seen.by_identifier.remove(&identifier), fresh) {
                (None, Some(result)) => {
                    seen.by_identifier.insert(identifier, result.clone());
                    events.push(ChangeEvent::Added(result));
                }
                (Some(_), Some(result)) => {
                    seen.by_identifier.insert(identifier, result.clone());
                    events.push(ChangeEvent::Modified(result));
                }
                (Some(_), None) => events.push(ChangeEvent::Removed(identifier)),
                (None, None) => {}
            }
        }
        Ok(events)
    }

    fn diff_reduced(&self, txn: &Transaction<'_>, query: &Query, seen: &mut LiveResultSet) -> Result<Vec<ChangeEvent>> {
        let reduce = query.reduce.as_ref().expect("diff_reduced is only called for reduce queries");
        let fresh_results = self.execute(txn, query)?;
        let mut fresh: HashMap<Vec<u8>, QueryResult> = HashMap::new();
        for result in fresh_results {
            let key = result.properties.get(&reduce.property).map(normalize).unwrap_or_default();
            fresh.insert(key, result);
        }

        let mut events = Vec::new();
        for (key, result) in &fresh {
            match seen.reduced.get(key) {
                None => events.push(ChangeEvent::Added(result.clone())),
                Some(prior) if prior.identifier != result.identifier => {
                    events.push(ChangeEvent::Modified(result.clone()));
                }
                Some(_) => {}
            }
        }
        for (key, prior) in &seen.reduced {
            if !fresh.contains_key(key) {
                events.push(ChangeEvent::Removed(prior.identifier));
            }
        }
        seen.reduced = fresh;
        Ok(events)
    }

    /// Drains `live`'s pending commit notifications and, if any committed
    /// revisions are in range, diffs them via [`Self::diff`] and pushes the
    /// resulting events onto `live` (drained with
    /// [`LiveQuery::next_event`]/[`futures_core::Stream`]). Returns the
    /// number of events pushed (`0` if nothing new had committed).
    pub fn advance_live_query(
        &self,
        txn: &Transaction<'_>,
        query: &Query,
        live: &mut LiveQuery,
        seen: &mut LiveResultSet,
    ) -> Result<usize> {
        let Some((lower, upper)) = live.pending_range() else { return Ok(0) };
        let events = self.diff(txn, query, Revision::new(lower), Revision::new(upper), seen)?;
        let count = events.len();
        for event in events {
            live.push_event(event);
        }
        Ok(count)
    }
}

/// A live query's previously known result set, threaded through repeated
/// calls to [`QueryRunner::diff`] so added/modified/removed can be told
/// apart from the next revision range's materialized results. Seed it from
/// a query's initial batch result set via [`Self::seed`] before the first
/// `diff` call.
#[derive(Default)]
pub struct LiveResultSet {
    by_identifier: HashMap<Identifier, QueryResult>,
    reduced: HashMap<Vec<u8>, QueryResult>,
}

impl LiveResultSet {
    /// An empty result set, e.g. for a live query with no prior results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the result set from `query`'s initial (batch) result set.
    pub fn seed(query: &Query, results: Vec<QueryResult>) -> Self {
        let mut set = Self::default();
        if let Some(reduce) = &query.reduce {
            for result in results {
                let key = result.properties.get(&reduce.property).map(normalize).unwrap_or_default();
                set.reduced.insert(key, result);
            }
        } else {
            for result in results {
                set.by_identifier.insert(result.identifier, result);
            }
        }
        set
    }
}

fn apply_reduce(results: Vec<QueryResult>, reduce: &Reduce) -> Vec<QueryResult> {
    let mut groups: HashMap<Vec<u8>, Vec<QueryResult>> = HashMap::new();
    for result in results {
        let key = result
            .properties
            .get(&reduce.property)
            .map(normalize)
            .unwrap_or_default();
        groups.entry(key).or_default().push(result);
    }

    let selector_property = match &reduce.selector {
        Selector::MaxOf(p) | Selector::MinOf(p) => p.clone(),
    };
    let pick_max = matches!(reduce.selector, Selector::MaxOf(_));

    let mut out = Vec::new();
    for (_, mut members) in groups {
        members.sort_by(|a, b| {
            let a_key = a.properties.get(&selector_property).map(normalize);
            let b_key = b.properties.get(&selector_property).map(normalize);
            if pick_max {
                b_key.cmp(&a_key)
            } else {
                a_key.cmp(&b_key)
            }
        });
        let count = members.len();
        if let Some(mut representative) = members.into_iter().next() {
            representative.group_count = Some(count);
            out.push(representative);
        }
    }
    out
}

fn evaluate(comparator: &Comparator, value: &PropertyValue) -> bool {
    match comparator {
        Comparator::Equals(expected) => normalize(expected) == normalize(value),
        Comparator::In(values) => values.iter().any(|v| normalize(v) == normalize(value)),
        Comparator::Contains(needle) => match value {
            PropertyValue::Text(text) => text.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
        Comparator::GreaterThan(bound) => normalize(value) > normalize(bound),
        Comparator::LessThan(bound) => normalize(value) < normalize(bound),
        Comparator::Range(lower, upper) => {
            let v = normalize(value);
            v >= normalize(lower) && v <= normalize(upper)
        }
        Comparator::Fulltext(_) => true, // handled separately, against the full-text index
    }
}
