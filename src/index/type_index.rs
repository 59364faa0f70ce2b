//! Type index (C4): per-entity-type registry of indexed properties, sort
//! indexes, and secondary-key indexes; resolves queries into index plans.
//!
//! Grounded in `original_source/common/typeindex.cpp`: value normalization
//! (`getByteArray`), the sort-key construction for dates
//! (`toSortableByteArray`, newest-first), and the three-step query
//! resolution algorithm (`TypeIndex::query`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::btree::Transaction;
use crate::error::Result;
use crate::index::equality::EqualityIndex;
use crate::key::Identifier;

/// A normalized property value, as read from an entity adaptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Raw bytes (e.g. a blob property).
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Boolean.
    Bool(bool),
    /// Unix seconds. `None` models an invalid/unparseable date.
    DateTime(Option<i64>),
    /// A reference to another entity.
    Reference(Identifier),
}

/// Read-only access to an entity's properties by name, independent of its
/// concrete Rust type (spec.md §9: "tagged union... plus a per-variant
/// adaptor that exposes get/set/available_properties/changed_properties").
pub trait Adaptor {
    /// Returns the current value of `property`, if set.
    fn get(&self, property: &str) -> Option<PropertyValue>;
    /// Every property this entity could expose.
    fn available_properties(&self) -> Vec<String>;
}

/// The literal token substituted for an empty property value, since empty
/// keys are not allowed in the underlying store.
pub const EMPTY_VALUE_TOKEN: &[u8] = b"toplevel";

/// Normalizes a property value into index-key bytes.
pub fn normalize(value: &PropertyValue) -> Vec<u8> {
    match value {
        PropertyValue::Bytes(b) if b.is_empty() => EMPTY_VALUE_TOKEN.to_vec(),
        PropertyValue::Bytes(b) => b.clone(),
        PropertyValue::Text(s) if s.is_empty() => EMPTY_VALUE_TOKEN.to_vec(),
        PropertyValue::Text(s) => s.as_bytes().to_vec(),
        PropertyValue::Bool(true) => b"t".to_vec(),
        PropertyValue::Bool(false) => b"f".to_vec(),
        PropertyValue::Reference(id) => id.to_internal_bytes().to_vec(),
        PropertyValue::DateTime(ts) => sort_key(*ts).to_vec(),
    }
}

/// Builds the sort-key suffix for a date-time property: `2^32 - unixSeconds`
/// zero-padded to 10 ASCII digits, so ascending lexicographic order is
/// newest-first. Dates outside `[0, u32::MAX]` (including unparseable
/// dates, modeled as `None`) sort last.
pub fn sort_key(unix_seconds: Option<i64>) -> [u8; 10] {
    let value: u32 = match unix_seconds {
        Some(s) if (0..=u32::MAX as i64).contains(&s) => u32::MAX - s as u32,
        _ => u32::MAX,
    };
    let s = format!("{:010}", value);
    let mut buf = [0u8; 10];
    buf.copy_from_slice(s.as_bytes());
    buf
}

/// Supported query comparators. Only `Equals` and `In` are ever resolved by
/// an index (spec.md §4.4); the rest are always applied by the query runner.
#[derive(Clone, Debug, PartialEq)]
pub enum Comparator {
    /// Exact match against a single value.
    Equals(PropertyValue),
    /// Match any of the listed values.
    In(Vec<PropertyValue>),
    /// Substring containment (runner-only).
    Contains(String),
    /// Strictly greater than (runner-only).
    GreaterThan(PropertyValue),
    /// Strictly less than (runner-only).
    LessThan(PropertyValue),
    /// Inclusive range (runner-only).
    Range(PropertyValue, PropertyValue),
    /// Full-text match against the given term (runner-only, delegates to C5).
    Fulltext(String),
}

impl Comparator {
    /// True if the type index can resolve this comparator directly.
    pub fn is_index_resolvable(&self) -> bool {
        matches!(self, Comparator::Equals(_) | Comparator::In(_))
    }
}

/// A sorted-index registration: `(filterProperty, sortProperty)`.
#[derive(Clone, Debug)]
struct SortedIndex {
    filter_property: String,
    sort_property: String,
}

/// Outcome of [`TypeIndex::query`]: the candidate identifiers plus which
/// parts of the caller's query were already satisfied by the index.
#[derive(Debug, Default)]
pub struct IndexPlan {
    /// Candidate identifiers, in index order.
    pub identifiers: Vec<Identifier>,
    /// Property names whose filter the index already applied.
    pub applied_filters: Vec<String>,
    /// True if `identifiers` is already ordered by the query's sort property.
    pub applied_sorting: bool,
}

impl IndexPlan {
    fn none() -> Self {
        Self::default()
    }
}

/// A single filter in a query, as seen by [`TypeIndex::query`].
pub struct QueryFilter<'a> {
    /// Property name the filter applies to.
    pub property: &'a str,
    /// The comparator.
    pub comparator: &'a Comparator,
}

/// Per-entity-type registry of indexed properties (C4).
pub struct TypeIndex {
    entity_type: String,
    simple_properties: Vec<String>,
    sorted_indexes: Vec<SortedIndex>,
    /// `(left, right)` secondary indexes: `left value -> right value`.
    secondary_indexes: Vec<(String, String)>,
}

impl TypeIndex {
    /// Creates an empty registry for `entity_type` (e.g. `"mail"`).
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            simple_properties: Vec::new(),
            sorted_indexes: Vec::new(),
            secondary_indexes: Vec::new(),
        }
    }

    /// Registers a simple equality-indexed property.
    pub fn add_property(&mut self, property: impl Into<String>) -> &mut Self {
        self.simple_properties.push(property.into());
        self
    }

    /// Registers a `(filterProperty, sortProperty)` sorted index.
    pub fn add_sorted_property(
        &mut self,
        filter_property: impl Into<String>,
        sort_property: impl Into<String>,
    ) -> &mut Self {
        self.sorted_indexes.push(SortedIndex {
            filter_property: filter_property.into(),
            sort_property: sort_property.into(),
        });
        self
    }

    /// Registers a `(left, right)` secondary index hopping from one
    /// property's value directly to another's, without touching the main
    /// table.
    pub fn add_secondary_property(
        &mut self,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> &mut Self {
        self.secondary_indexes.push((left.into(), right.into()));
        self
    }

    fn index_name(&self, property: &str) -> String {
        format!("{}.index.{}", self.entity_type, property)
    }

    fn sort_index_name(&self, property: &str, sort_property: &str) -> String {
        format!("{}.index.{}.sort.{}", self.entity_type, property, sort_property)
    }

    fn secondary_index_name(&self, left: &str, right: &str) -> String {
        format!("{}.index.{}.{}", self.entity_type, left, right)
    }

    /// Indexes `entity` under `identifier` (called by the default indexer
    /// preprocessor on create/modify).
    pub fn add(&self, txn: &Transaction<'_>, identifier: Identifier, entity: &dyn Adaptor) -> Result<()> {
        for property in &self.simple_properties {
            if let Some(value) = entity.get(property) {
                EqualityIndex::new(self.index_name(property)).add(txn, &normalize(&value), identifier)?;
            }
        }
        for sorted in &self.sorted_indexes {
            if let Some(value) = entity.get(&sorted.filter_property) {
                let key = self.sorted_key(&value, entity.get(&sorted.sort_property));
                let name = self.sort_index_name(&sorted.filter_property, &sorted.sort_property);
                EqualityIndex::new(name).add(txn, &key, identifier)?;
            }
        }
        for (left, right) in &self.secondary_indexes {
            if let (Some(l), Some(r)) = (entity.get(left), entity.get(right)) {
                let name = self.secondary_index_name(left, right);
                // Secondary indexes map value -> value directly; the
                // identifier is not needed to hop from one property to
                // another, so we still key the multimap by the left value
                // and store the right value's bytes as the "identifier"
                // slot is unused here -- see `lookup_secondary`.
                EqualityIndex::new(name).add(txn, &normalize(&l), reinterpret_as_identifier(&normalize(&r)))?;
            }
        }
        Ok(())
    }

    /// Removes `entity`'s index entries (called on modify, with the *old*
    /// snapshot, and on delete).
    pub fn remove(&self, txn: &Transaction<'_>, identifier: Identifier, entity: &dyn Adaptor) -> Result<()> {
        for property in &self.simple_properties {
            if let Some(value) = entity.get(property) {
                EqualityIndex::new(self.index_name(property)).remove(txn, &normalize(&value), identifier)?;
            }
        }
        for sorted in &self.sorted_indexes {
            if let Some(value) = entity.get(&sorted.filter_property) {
                let key = self.sorted_key(&value, entity.get(&sorted.sort_property));
                let name = self.sort_index_name(&sorted.filter_property, &sorted.sort_property);
                EqualityIndex::new(name).remove(txn, &key, identifier)?;
            }
        }
        for (left, right) in &self.secondary_indexes {
            if let (Some(l), Some(r)) = (entity.get(left), entity.get(right)) {
                let name = self.secondary_index_name(left, right);
                EqualityIndex::new(name).remove(txn, &normalize(&l), reinterpret_as_identifier(&normalize(&r)))?;
            }
        }
        Ok(())
    }

    fn sorted_key(&self, filter_value: &PropertyValue, sort_value: Option<PropertyValue>) -> Vec<u8> {
        let ts = match sort_value {
            Some(PropertyValue::DateTime(ts)) => ts,
            _ => None,
        };
        let mut key = normalize(filter_value);
        key.extend_from_slice(&sort_key(ts));
        key
    }

    /// Resolves `filters` into an index plan (spec.md §4.4):
    ///
    /// 1. If a sorted `(p, s)` index exists for some `p` with a filter and
    ///    `sort_property == s`, use it -- both filter and sort are applied.
    /// 2. Else, the first simple-property index with a matching filter.
    /// 3. Else, no plan; the runner falls back to a full type scan.
    pub fn query(
        &self,
        txn: &Transaction<'_>,
        filters: &[QueryFilter<'_>],
        sort_property: Option<&str>,
    ) -> Result<IndexPlan> {
        if let Some(sort_property) = sort_property {
            for sorted in &self.sorted_indexes {
                if sorted.sort_property != sort_property {
                    continue;
                }
                if let Some(filter) = filters.iter().find(|f| f.property == sorted.filter_property) {
                    if !filter.comparator.is_index_resolvable() {
                        continue;
                    }
                    let name = self.sort_index_name(&sorted.filter_property, &sorted.sort_property);
                    let ids = self.lookup_sorted(txn, &name, filter.comparator)?;
                    return Ok(IndexPlan {
                        identifiers: ids,
                        applied_filters: vec![sorted.filter_property.clone()],
                        applied_sorting: true,
                    });
                }
            }
        }

        for property in &self.simple_properties {
            if let Some(filter) = filters.iter().find(|f| &f.property == property) {
                if !filter.comparator.is_index_resolvable() {
                    continue;
                }
                let name = self.index_name(property);
                let ids = self.lookup_exact(txn, &name, filter.comparator)?;
                return Ok(IndexPlan {
                    identifiers: ids,
                    applied_filters: vec![property.clone()],
                    applied_sorting: false,
                });
            }
        }

        Ok(IndexPlan::none())
    }

    /// Resolves an `Equals`/`In` comparator against a simple-property index,
    /// whose keys are exactly `normalize(value)`.
    fn lookup_exact(&self, txn: &Transaction<'_>, index_name: &str, comparator: &Comparator) -> Result<Vec<Identifier>> {
        let index = EqualityIndex::new(index_name);
        match comparator {
            Comparator::Equals(value) => index.lookup(txn, &normalize(value)),
            Comparator::In(values) => {
                let mut out = Vec::new();
                for value in values {
                    out.extend(index.lookup(txn, &normalize(value))?);
                }
                Ok(out)
            }
            _ => unreachable!("caller checked is_index_resolvable"),
        }
    }

    /// Resolves an `Equals`/`In` comparator against a sorted index, whose
    /// keys are `normalize(filterValue) ⧺ sortKey(date)`: scanning by the
    /// filter-value prefix returns every match already ordered newest-first.
    fn lookup_sorted(&self, txn: &Transaction<'_>, index_name: &str, comparator: &Comparator) -> Result<Vec<Identifier>> {
        let index = EqualityIndex::new(index_name);
        match comparator {
            Comparator::Equals(value) => index.lookup_prefix(txn, &normalize(value)),
            Comparator::In(values) => {
                let mut out = Vec::new();
                for value in values {
                    out.extend(index.lookup_prefix(txn, &normalize(value))?);
                }
                Ok(out)
            }
            _ => unreachable!("caller checked is_index_resolvable"),
        }
    }

    /// Looks up the right-hand value for `left_value` via a registered
    /// secondary index, hopping without touching the main table
    /// (`original_source/common/typeindex.cpp`'s `secondaryLookup`).
    pub fn lookup_secondary(
        &self,
        txn: &Transaction<'_>,
        left: &str,
        right: &str,
        left_value: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let name = self.secondary_index_name(left, right);
        let index = EqualityIndex::new(name);
        Ok(index
            .lookup_one(txn, left_value)?
            .map(|id| id.to_internal_bytes().to_vec()))
    }
}

/// Secondary indexes store arbitrary value bytes in the slot the equality
/// index otherwise uses for an `Identifier`. Both are fixed 16-byte values
/// here: identifiers are 16 bytes, and secondary values are truncated or
/// padded to fit so the same multimap storage can be reused without a
/// parallel byte-oriented index type.
fn reinterpret_as_identifier(bytes: &[u8]) -> Identifier {
    let mut buf = [0u8; 16];
    let n = bytes.len().min(16);
    buf[..n].copy_from_slice(&bytes[..n]);
    Identifier::from_internal_bytes(&buf).expect("16 bytes is always a valid identifier encoding")
}

/// Registry of [`TypeIndex`]es, one per declared entity type.
#[derive(Default)]
pub struct TypeIndexRegistry {
    indexes: HashMap<String, TypeIndex>,
}

impl TypeIndexRegistry {
    /// Registers `index` under its entity type name.
    pub fn register(&mut self, index: TypeIndex) {
        self.indexes.insert(index.entity_type.clone(), index);
    }

    /// The registered index for `entity_type`, if any.
    pub fn get(&self, entity_type: &str) -> Option<&TypeIndex> {
        self.indexes.get(entity_type)
    }
}
