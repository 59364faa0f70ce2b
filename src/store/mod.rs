//! Entity store (C6): revisioned CRUD over the B+tree environment.
//!
//! Grounded in `original_source/common/entitystore.cpp` and spec.md §4.6.
//! Tables per entity type: `<type>.main` (key = [`Key`], value =
//! bincode-serialized [`EntityRecord`]); shared per environment:
//! `revisions`, `revisionType`, `uids`, `typeuids.<type>`, `__metadata`.
//!
//! All writes happen inside exactly one write transaction; preprocessors
//! run synchronously within it (see [`crate::pipeline`]), so index
//! maintenance is atomic with the record write.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::btree::{not_found_identifier, Transaction};
use crate::error::{ConstraintViolation, Result, SinkError};
use crate::index::type_index::{Adaptor, PropertyValue};
use crate::key::{Identifier, Key, Revision};
use crate::pipeline::Pipeline;
use crate::scalar;

const MAX_REVISION_DB: &str = "__metadata";
const MAX_REVISION_KEY: &str = "maxRevision";
const CLEANED_UP_REVISION_KEY: &str = "cleanedUpRevision";
const REVISIONS_DB: &str = "revisions";
const REVISION_TYPE_DB: &str = "revisionType";
const UIDS_DB: &str = "uids";

/// The operation a record at a given revision represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// The entity's first revision.
    Create,
    /// A later revision replacing the prior snapshot.
    Modify,
    /// A tombstone; the entity has no further revisions.
    Delete,
}

/// One revision's stored record: the operation that produced it, the
/// property snapshot (empty for a tombstone), and the change-set (the
/// properties this particular revision actually touched, relative to the
/// prior revision).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityRecord {
    /// What produced this revision.
    pub operation: Operation,
    /// Property values as of this revision.
    pub properties: HashMap<String, PropertyValue>,
    /// Properties touched by this revision: every property set at creation,
    /// or (for a modify) every property whose value actually changed plus
    /// every property actually deleted. Sorted, deduplicated. Empty for a
    /// tombstone.
    pub change_set: Vec<String>,
}

impl EntityRecord {
    /// Builds a record directly from a property map, with an empty
    /// change-set; [`EntityStore::add`] and [`EntityStore::modify`] compute
    /// the real change-set themselves before writing.
    pub fn new(operation: Operation, properties: HashMap<String, PropertyValue>) -> Self {
        Self { operation, properties, change_set: Vec::new() }
    }

    /// A tombstone record carrying no properties.
    pub fn tombstone() -> Self {
        Self { operation: Operation::Delete, properties: HashMap::new(), change_set: Vec::new() }
    }

    /// True if this record is a tombstone (spec.md §4.6's "skip tombstones").
    pub fn is_tombstone(&self) -> bool {
        self.operation == Operation::Delete
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl Adaptor for EntityRecord {
    fn get(&self, property: &str) -> Option<PropertyValue> {
        self.properties.get(property).cloned()
    }

    fn available_properties(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }
}

/// Looks up `identifier`'s latest record directly, independent of any
/// particular [`EntityStore`] instance. Used by the change-replay cursor
/// (C10), which walks the shared revision log across every entity type.
pub fn read_latest_record(txn: &Transaction<'_>, entity_type: &str, identifier: Identifier) -> Result<Option<EntityRecord>> {
    let db = match txn.open_database(&format!("{entity_type}.main"), false) {
        Ok(db) => db,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut found = None;
    db.find_latest(&Key::prefix_for(identifier), |_, v| {
        found = EntityRecord::from_bytes(v).ok();
    })?;
    Ok(found)
}

/// Revisioned CRUD for one entity type, with preprocessor hooks run inside
/// every write.
pub struct EntityStore {
    entity_type: String,
    pipeline: Pipeline,
}

impl EntityStore {
    /// Creates a store for `entity_type` (e.g. `"mail"`), running
    /// `pipeline`'s preprocessors on every write.
    pub fn new(entity_type: impl Into<String>, pipeline: Pipeline) -> Self {
        Self { entity_type: entity_type.into(), pipeline }
    }

    fn main_db(&self) -> String {
        format!("{}.main", self.entity_type)
    }

    fn typeuids_db(&self) -> String {
        format!("{}.typeuids", self.entity_type)
    }

    fn next_revision(&self, txn: &Transaction<'_>) -> Result<Revision> {
        let current = scalar::read_u64(txn, MAX_REVISION_DB, MAX_REVISION_KEY, 0)?;
        Ok(Revision::new(current + 1))
    }

    fn advance_max_revision(&self, txn: &Transaction<'_>, revision: Revision) -> Result<()> {
        scalar::write_u64(txn, MAX_REVISION_DB, MAX_REVISION_KEY, revision.value())
    }

    /// Looks up the latest revision and record for `identifier`, or `None`
    /// if it has never been written. Exposed crate-wide for the query
    /// runner's materialize step.
    pub(crate) fn latest_record(&self, txn: &Transaction<'_>, identifier: Identifier) -> Result<Option<(Revision, EntityRecord)>> {
        let db = match txn.open_database(&self.main_db(), false) {
            Ok(db) => db,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut found = None;
        db.find_latest(&Key::prefix_for(identifier), |k, v| {
            if let (Ok(key), Ok(record)) = (Key::from_internal_bytes(k), EntityRecord::from_bytes(v)) {
                found = Some((key.revision(), record));
            }
        })?;
        Ok(found)
    }

    fn write_record(
        &self,
        txn: &Transaction<'_>,
        identifier: Identifier,
        revision: Revision,
        record: &EntityRecord,
    ) -> Result<()> {
        let key = Key::new(identifier, revision);
        {
            let mut main = txn.open_database(&self.main_db(), false)?;
            main.write(&key.to_internal_bytes(), &record.to_bytes()?)?;
        }
        {
            let mut revisions = txn.open_database(REVISIONS_DB, false)?;
            revisions.write(&revision.to_internal_bytes(), &identifier.to_internal_bytes())?;
        }
        {
            let mut revision_type = txn.open_database(REVISION_TYPE_DB, false)?;
            revision_type.write(&revision.to_internal_bytes(), self.entity_type.as_bytes())?;
        }
        self.advance_max_revision(txn, revision)
    }

    /// Creates a new entity, assigning `identifier` a fresh revision.
    ///
    /// Fails with [`ConstraintViolation::AlreadyExists`] if `identifier`
    /// already has a live (non-tombstone) revision.
    #[instrument(skip(self, txn, entity), fields(entity_type = %self.entity_type))]
    pub fn add(&self, txn: &Transaction<'_>, identifier: Identifier, entity: EntityRecord) -> Result<Revision> {
        if let Some((_, existing)) = self.latest_record(txn, identifier)? {
            if !existing.is_tombstone() {
                return Err(ConstraintViolation::AlreadyExists(identifier.to_display_string()).into());
            }
        }
        let revision = self.next_revision(txn)?;
        let mut change_set: Vec<String> = entity.properties.keys().cloned().collect();
        change_set.sort();
        let record = EntityRecord { operation: Operation::Create, properties: entity.properties, change_set };
        self.write_record(txn, identifier, revision, &record)?;
        {
            let mut uids = txn.open_database(UIDS_DB, false)?;
            uids.write(&identifier.to_internal_bytes(), self.entity_type.as_bytes())?;
        }
        {
            let mut typeuids = txn.open_database(&self.typeuids_db(), false)?;
            typeuids.write(&identifier.to_internal_bytes(), &revision.to_internal_bytes())?;
        }
        self.pipeline.new_entity(txn, identifier, &record)?;
        Ok(revision)
    }

    /// Modifies an existing entity.
    ///
    /// `deletions` names properties to drop even if absent from `entity`.
    /// `base_revision` is the revision the caller's changes were computed
    /// against; if it is older than the stored latest, fails with
    /// [`SinkError::Conflict`].
    #[instrument(skip(self, txn, entity), fields(entity_type = %self.entity_type))]
    pub fn modify(
        &self,
        txn: &Transaction<'_>,
        identifier: Identifier,
        base_revision: Revision,
        entity: EntityRecord,
        deletions: &[String],
    ) -> Result<Revision> {
        let (latest_revision, old_record) = self
            .latest_record(txn, identifier)?
            .ok_or_else(|| not_found_identifier(identifier.to_display_string()))?;
        if old_record.is_tombstone() {
            return Err(not_found_identifier(identifier.to_display_string()));
        }
        if base_revision.value() < latest_revision.value() {
            return Err(SinkError::Conflict {
                identifier: identifier.to_display_string(),
                base: base_revision.value(),
                latest: latest_revision.value(),
            });
        }

        let mut properties = old_record.properties.clone();
        let mut change_set: Vec<String> = Vec::new();
        for (k, v) in entity.properties {
            if old_record.properties.get(&k) != Some(&v) {
                change_set.push(k.clone());
            }
            properties.insert(k, v);
        }
        for deleted in deletions {
            if properties.remove(deleted).is_some() {
                change_set.push(deleted.clone());
            }
        }
        change_set.sort();
        change_set.dedup();

        let revision = self.next_revision(txn)?;
        let new_record = EntityRecord { operation: Operation::Modify, properties, change_set };
        self.write_record(txn, identifier, revision, &new_record)?;
        {
            let mut typeuids = txn.open_database(&self.typeuids_db(), false)?;
            typeuids.write(&identifier.to_internal_bytes(), &revision.to_internal_bytes())?;
        }
        self.pipeline.modified_entity(txn, identifier, &old_record, &new_record)?;
        Ok(revision)
    }

    /// Writes a tombstone for `identifier`.
    #[instrument(skip(self, txn), fields(entity_type = %self.entity_type))]
    pub fn remove(&self, txn: &Transaction<'_>, identifier: Identifier) -> Result<Revision> {
        let (_, old_record) = self
            .latest_record(txn, identifier)?
            .ok_or_else(|| not_found_identifier(identifier.to_display_string()))?;
        if old_record.is_tombstone() {
            return Err(not_found_identifier(identifier.to_display_string()));
        }

        let revision = self.next_revision(txn)?;
        let tombstone = EntityRecord::tombstone();
        self.write_record(txn, identifier, revision, &tombstone)?;
        {
            let mut typeuids = txn.open_database(&self.typeuids_db(), false)?;
            typeuids.write(&identifier.to_internal_bytes(), &revision.to_internal_bytes())?;
        }
        self.pipeline.deleted_entity(txn, identifier, &old_record)?;
        Ok(revision)
    }

    /// Iterates every identifier ever created of this type, exactly once.
    pub fn read_all_uids(&self, txn: &Transaction<'_>, mut on_uid: impl FnMut(Identifier) -> bool) -> Result<()> {
        let db = match txn.open_database(&self.typeuids_db(), false) {
            Ok(db) => db,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        db.scan(&[], false, |k, _| {
            match Identifier::from_internal_bytes(k) {
                Ok(id) => on_uid(id),
                Err(_) => true,
            }
        })
    }

    /// Iterates every identifier's latest live record, skipping tombstones.
    pub fn read_all(
        &self,
        txn: &Transaction<'_>,
        mut on_entity: impl FnMut(Identifier, &EntityRecord) -> bool,
    ) -> Result<()> {
        let mut stop = false;
        self.read_all_uids(txn, |id| {
            if stop {
                return false;
            }
            if let Ok(Some((_, record))) = self.latest_record(txn, id) {
                if !record.is_tombstone() && !on_entity(id, &record) {
                    stop = true;
                    return false;
                }
            }
            true
        })
    }

    /// Looks up the identifier and record at exactly `revision`, if the
    /// revision log knows it belongs to this type.
    pub fn read_revisions(
        &self,
        txn: &Transaction<'_>,
        lower: Revision,
        upper: Revision,
        mut on_revision: impl FnMut(Revision, Identifier) -> bool,
    ) -> Result<()> {
        let revisions = match txn.open_database(REVISIONS_DB, false) {
            Ok(db) => db,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut stop = false;
        revisions.scan(&[], false, |k, v| {
            if stop {
                return false;
            }
            let (Ok(revision), Ok(identifier)) = (Revision::from_internal_bytes(k), Identifier::from_internal_bytes(v))
            else {
                return true;
            };
            if revision.value() < lower.value() || revision.value() > upper.value() {
                return revision.value() <= upper.value();
            }
            if !on_revision(revision, identifier) {
                stop = true;
                return false;
            }
            true
        })?;
        Ok(())
    }

    /// Drops superseded revisions: for every identifier of this type with
    /// more than one stored revision whose oldest is below
    /// `live_query_lower_bound` (the minimum revision a still-active live
    /// query needs visible), all but the latest are removed. A lone
    /// remaining tombstone below the bound is removed entirely, since no
    /// live query can still be replaying it (spec.md §4.6). Returns the
    /// number of revisions dropped.
    #[instrument(skip(self, txn), fields(entity_type = %self.entity_type))]
    pub fn collect_garbage(&self, txn: &Transaction<'_>, live_query_lower_bound: Revision) -> Result<u64> {
        let mut dropped = 0u64;
        let mut ids = Vec::new();
        self.read_all_uids(txn, |id| {
            ids.push(id);
            true
        })?;

        for id in ids {
            let main = txn.open_database(&self.main_db(), false)?;
            let mut revisions: Vec<Key> = Vec::new();
            main.scan(&Key::prefix_for(id), true, |k, _| {
                if let Ok(key) = Key::from_internal_bytes(k) {
                    revisions.push(key);
                }
                true
            })?;
            drop(main);
            if revisions.len() < 2 {
                continue;
            }
            revisions.sort_by_key(|k| k.revision().value());
            let latest = *revisions.last().unwrap();
            let stale: Vec<Key> = revisions[..revisions.len() - 1]
                .iter()
                .filter(|k| k.revision().value() < live_query_lower_bound.value())
                .copied()
                .collect();
            if stale.is_empty() {
                continue;
            }
            {
                let mut main = txn.open_database(&self.main_db(), false)?;
                for key in &stale {
                    main.remove(&key.to_internal_bytes())?;
                    dropped += 1;
                }
            }

            if latest.revision().value() < live_query_lower_bound.value() {
                let is_tombstone = self
                    .latest_record(txn, id)?
                    .map(|(_, record)| record.is_tombstone())
                    .unwrap_or(false);
                if is_tombstone {
                    let mut main = txn.open_database(&self.main_db(), false)?;
                    main.remove(&latest.to_internal_bytes())?;
                    dropped += 1;
                    let mut uids = txn.open_database(UIDS_DB, false)?;
                    uids.remove(&id.to_internal_bytes())?;
                    let mut typeuids = txn.open_database(&self.typeuids_db(), false)?;
                    typeuids.remove(&id.to_internal_bytes())?;
                }
            }
        }

        scalar::write_u64(txn, MAX_REVISION_DB, CLEANED_UP_REVISION_KEY, live_query_lower_bound.value())?;
        Ok(dropped)
    }
}
