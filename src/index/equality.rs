//! Equality index (C3): `indexedValue -> entityIdentifier` multimap.
//!
//! Grounded in `original_source/common/index.cpp`'s `Index` class: a thin
//! wrapper over a [`NamedDatabase`](crate::btree::NamedDatabase) opened with
//! allow-duplicates. No uniqueness is enforced beyond what the underlying
//! store already deduplicates (an identical key-value pair written twice is
//! one entry).

use crate::btree::Transaction;
use crate::error::Result;
use crate::key::Identifier;

/// A named multimap database mapping an indexed value to the identifiers of
/// entities carrying that value.
pub struct EqualityIndex {
    name: String,
}

impl EqualityIndex {
    /// Names the index database. Opened lazily against whichever
    /// transaction each operation is given.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Database name this index is stored under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds `value -> identifier`.
    pub fn add(&self, txn: &Transaction<'_>, value: &[u8], identifier: Identifier) -> Result<()> {
        let mut db = txn.open_database(&self.name, true)?;
        db.write(value, &identifier.to_internal_bytes())
    }

    /// Removes the exact `value -> identifier` pair.
    pub fn remove(&self, txn: &Transaction<'_>, value: &[u8], identifier: Identifier) -> Result<()> {
        let mut db = txn.open_database(&self.name, true)?;
        db.remove_pair(value, &identifier.to_internal_bytes())
    }

    /// Looks up every identifier stored under `value`.
    pub fn lookup(&self, txn: &Transaction<'_>, value: &[u8]) -> Result<Vec<Identifier>> {
        let db = txn.open_database(&self.name, true)?;
        let mut out = Vec::new();
        db.scan(value, false, |_, v| {
            if let Ok(id) = Identifier::from_internal_bytes(v) {
                out.push(id);
            }
            true
        })?;
        Ok(out)
    }

    /// Looks up every identifier whose stored key starts with `prefix`, in
    /// key order. Used for sorted-index queries, where the key is
    /// `filterValue ⧺ sortKey`: scanning by the filter-value prefix alone
    /// yields every match already ordered by the sort-key suffix.
    pub fn lookup_prefix(&self, txn: &Transaction<'_>, prefix: &[u8]) -> Result<Vec<Identifier>> {
        let db = txn.open_database(&self.name, true)?;
        let mut out = Vec::new();
        db.scan(prefix, true, |_, v| {
            if let Ok(id) = Identifier::from_internal_bytes(v) {
                out.push(id);
            }
            true
        })?;
        Ok(out)
    }

    /// Like [`Self::lookup_prefix`] but returns each matching entry's full
    /// key alongside its identifier, in key order. Used where a caller
    /// encodes extra data into the key suffix beyond the filter-value prefix
    /// (e.g. the full-text index's per-posting term position).
    pub fn scan_prefix_with_keys(&self, txn: &Transaction<'_>, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Identifier)>> {
        let db = txn.open_database(&self.name, true)?;
        let mut out = Vec::new();
        db.scan(prefix, true, |k, v| {
            if let Ok(id) = Identifier::from_internal_bytes(v) {
                out.push((k.to_vec(), id));
            }
            true
        })?;
        Ok(out)
    }

    /// Looks up the first identifier stored under `value`, if any. Mirrors
    /// `Index::lookup(key) -> QByteArray` in `original_source`, used where a
    /// caller relies on single-result semantics (e.g. the synchronizer
    /// store's mappings).
    pub fn lookup_one(&self, txn: &Transaction<'_>, value: &[u8]) -> Result<Option<Identifier>> {
        let db = txn.open_database(&self.name, true)?;
        let mut found = None;
        db.scan(value, false, |_, v| {
            found = Identifier::from_internal_bytes(v).ok();
            false
        })?;
        Ok(found)
    }
}
