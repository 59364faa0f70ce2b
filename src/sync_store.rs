//! Synchronizer store (C8): bidirectional remote-id/local-id mapping, plus
//! a prefixed scratchpad for free-form sync state.
//!
//! Grounded line-for-line in `original_source/common/synchronizerstore.cpp`.
//! Remote-id lookups generate a fresh local identifier on first resolution
//! and record both directions; local-id lookups return `None` rather than
//! asserting when a local entity has not yet been written back, since that
//! is routine during sync rather than a programmer error here.

use crate::index::equality::EqualityIndex;
use crate::key::Identifier;
use crate::btree::Transaction;
use crate::error::Result;

/// Bidirectional identifier mapping and scratchpad for one entity type's
/// synchronizer.
pub struct SynchronizerStore {
    entity_type: String,
}

impl SynchronizerStore {
    /// Creates a store scoped to `entity_type` (e.g. `"mail"`).
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into() }
    }

    fn rid_mapping(&self) -> EqualityIndex {
        EqualityIndex::new(format!("rid.mapping.{}", self.entity_type))
    }

    /// Records both directions of a `localId <-> remoteId` mapping. The
    /// `localId -> remoteId` direction is kept in the scratchpad rather than
    /// an [`EqualityIndex`], since a remote id's byte length is arbitrary and
    /// an equality index's value slot is a fixed-width `Identifier`.
    pub fn record_remote_id(&self, txn: &Transaction<'_>, local_id: Identifier, remote_id: &[u8]) -> Result<()> {
        self.rid_mapping().add(txn, remote_id, local_id)?;
        self.write_value(txn, LOCALID_PREFIX, &local_id.to_internal_bytes(), remote_id)
    }

    /// Removes both directions of a `localId <-> remoteId` mapping.
    pub fn remove_remote_id(&self, txn: &Transaction<'_>, local_id: Identifier, remote_id: &[u8]) -> Result<()> {
        self.rid_mapping().remove(txn, remote_id, local_id)?;
        self.remove_value(txn, LOCALID_PREFIX, &local_id.to_internal_bytes())
    }

    /// Replaces `local_id`'s remote-id mapping with `new_remote_id`: the
    /// prior mapping (if any) is removed first, then the new one recorded.
    pub fn update_remote_id(&self, txn: &Transaction<'_>, local_id: Identifier, new_remote_id: &[u8]) -> Result<()> {
        if let Some(old_remote_id) = self.read_value(txn, LOCALID_PREFIX, &local_id.to_internal_bytes())? {
            self.remove_remote_id(txn, local_id, &old_remote_id)?;
        }
        self.record_remote_id(txn, local_id, new_remote_id)
    }

    /// Resolves `remote_id` to a local identifier, generating and recording
    /// a fresh one on first resolution. Returns `None` for an empty
    /// `remote_id`.
    pub fn resolve_remote_id(&self, txn: &Transaction<'_>, remote_id: &[u8]) -> Result<Option<Identifier>> {
        if remote_id.is_empty() {
            return Ok(None);
        }
        if let Some(local_id) = self.rid_mapping().lookup_one(txn, remote_id)? {
            return Ok(Some(local_id));
        }
        let local_id = Identifier::new();
        self.record_remote_id(txn, local_id, remote_id)?;
        Ok(Some(local_id))
    }

    /// Resolves `local_id` to its remote id, or `None` if the local entity
    /// has not yet been written back (routine during sync, not an error).
    pub fn resolve_local_id(&self, txn: &Transaction<'_>, local_id: Identifier) -> Result<Option<Vec<u8>>> {
        self.read_value(txn, LOCALID_PREFIX, &local_id.to_internal_bytes())
    }

    /// Batched form of [`Self::resolve_local_id`]; unresolved inputs are
    /// silently skipped.
    pub fn resolve_local_ids(&self, txn: &Transaction<'_>, local_ids: &[Identifier]) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for id in local_ids {
            if let Some(remote_id) = self.resolve_local_id(txn, *id)? {
                out.push(remote_id);
            }
        }
        Ok(out)
    }

    fn values_db(&self) -> String {
        format!("{}.values", self.entity_type)
    }

    /// Reads the value at `prefix ⧺ key`, or `None` if absent.
    pub fn read_value(&self, txn: &Transaction<'_>, prefix: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        let assembled = [prefix, key].concat();
        let db = match txn.open_database(&self.values_db(), false) {
            Ok(db) => db,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut found = None;
        db.scan(&assembled, false, |_, v| {
            found = Some(v.to_vec());
            false
        })?;
        Ok(found)
    }

    /// Writes `value` at `prefix ⧺ key`.
    pub fn write_value(&self, txn: &Transaction<'_>, prefix: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        let assembled = [prefix, key].concat();
        let mut db = txn.open_database(&self.values_db(), false)?;
        db.write(&assembled, value)
    }

    /// Removes the value at `prefix ⧺ key`. A no-op if the assembled key is
    /// empty.
    pub fn remove_value(&self, txn: &Transaction<'_>, prefix: &[u8], key: &[u8]) -> Result<()> {
        let assembled = [prefix, key].concat();
        if assembled.is_empty() {
            return Ok(());
        }
        let mut db = match txn.open_database(&self.values_db(), false) {
            Ok(db) => db,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        db.remove(&assembled)
    }

    /// Removes every value whose key starts with `prefix`. A no-op if
    /// `prefix` is empty (guards against accidentally wiping the whole
    /// scratchpad).
    pub fn remove_prefix(&self, txn: &Transaction<'_>, prefix: &[u8]) -> Result<()> {
        if prefix.is_empty() {
            return Ok(());
        }
        let keys = {
            let db = match txn.open_database(&self.values_db(), false) {
                Ok(db) => db,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            };
            let mut keys = Vec::new();
            db.scan(prefix, true, |k, _| {
                keys.push(k.to_vec());
                true
            })?;
            keys
        };
        let mut db = txn.open_database(&self.values_db(), false)?;
        for key in keys {
            db.remove(&key)?;
        }
        Ok(())
    }
}

/// Scratchpad key prefix for the `localId -> remoteId` direction, distinct
/// from any prefix a caller might pass to [`SynchronizerStore::write_value`].
const LOCALID_PREFIX: &[u8] = b"\0localid\0";
