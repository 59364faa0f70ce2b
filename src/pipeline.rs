//! Pipeline / preprocessors (C7).
//!
//! A [`Preprocessor`] observes every write the entity store performs,
//! inside the same write transaction, so index maintenance is atomic with
//! the record write it reacts to. Grounded in
//! `original_source/common/pipeline.cpp`'s three-hook preprocessor
//! interface and its built-in default indexer / property indexer.

use std::sync::Arc;

use crate::btree::Transaction;
use crate::error::Result;
use crate::index::equality::EqualityIndex;
use crate::index::type_index::{normalize, Adaptor, TypeIndex};
use crate::key::Identifier;

/// Observes entity lifecycle events inside the writing transaction.
///
/// Hooks run in pipeline declaration order. A hook returning `Err` aborts
/// the whole write transaction (spec.md §4.7: "preprocessor failure is
/// treated as a fatal commit error").
pub trait Preprocessor: Send + Sync {
    /// Called once, after a brand-new entity's record has been written.
    fn new_entity(&self, txn: &Transaction<'_>, identifier: Identifier, entity: &dyn Adaptor) -> Result<()>;

    /// Called after a modified entity's new record has been written, given
    /// both the prior and the new snapshot.
    fn modified_entity(
        &self,
        txn: &Transaction<'_>,
        identifier: Identifier,
        old: &dyn Adaptor,
        new: &dyn Adaptor,
    ) -> Result<()>;

    /// Called after a tombstone has been written, given the last live
    /// snapshot.
    fn deleted_entity(&self, txn: &Transaction<'_>, identifier: Identifier, old: &dyn Adaptor) -> Result<()>;
}

/// An ordered chain of preprocessors run by the entity store on every write.
#[derive(Default)]
pub struct Pipeline {
    preprocessors: Vec<Box<dyn Preprocessor>>,
}

impl Pipeline {
    /// An empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a preprocessor, to run after every preprocessor already
    /// added.
    pub fn add(&mut self, preprocessor: Box<dyn Preprocessor>) -> &mut Self {
        self.preprocessors.push(preprocessor);
        self
    }

    /// Runs every preprocessor's `new_entity` hook in order.
    pub fn new_entity(&self, txn: &Transaction<'_>, identifier: Identifier, entity: &dyn Adaptor) -> Result<()> {
        for p in &self.preprocessors {
            p.new_entity(txn, identifier, entity)?;
        }
        Ok(())
    }

    /// Runs every preprocessor's `modified_entity` hook in order.
    pub fn modified_entity(
        &self,
        txn: &Transaction<'_>,
        identifier: Identifier,
        old: &dyn Adaptor,
        new: &dyn Adaptor,
    ) -> Result<()> {
        for p in &self.preprocessors {
            p.modified_entity(txn, identifier, old, new)?;
        }
        Ok(())
    }

    /// Runs every preprocessor's `deleted_entity` hook in order.
    pub fn deleted_entity(&self, txn: &Transaction<'_>, identifier: Identifier, old: &dyn Adaptor) -> Result<()> {
        for p in &self.preprocessors {
            p.deleted_entity(txn, identifier, old)?;
        }
        Ok(())
    }
}

/// Built-in preprocessor maintaining a [`TypeIndex`] in step with every
/// write: `add` on create, `remove` the old snapshot then `add` the new on
/// modify, `remove` on delete.
pub struct DefaultIndexer {
    type_index: Arc<TypeIndex>,
}

impl DefaultIndexer {
    /// Wraps `type_index` as a preprocessor.
    pub fn new(type_index: Arc<TypeIndex>) -> Self {
        Self { type_index }
    }
}

impl Preprocessor for DefaultIndexer {
    fn new_entity(&self, txn: &Transaction<'_>, identifier: Identifier, entity: &dyn Adaptor) -> Result<()> {
        self.type_index.add(txn, identifier, entity)
    }

    fn modified_entity(
        &self,
        txn: &Transaction<'_>,
        identifier: Identifier,
        old: &dyn Adaptor,
        new: &dyn Adaptor,
    ) -> Result<()> {
        self.type_index.remove(txn, identifier, old)?;
        self.type_index.add(txn, identifier, new)
    }

    fn deleted_entity(&self, txn: &Transaction<'_>, identifier: Identifier, old: &dyn Adaptor) -> Result<()> {
        self.type_index.remove(txn, identifier, old)
    }
}

/// Built-in preprocessor maintaining a scalar single-property equality
/// index without a full [`TypeIndex`], used for auxiliary relations that
/// don't warrant their own type registration (spec.md §4.7).
pub struct CustomPropertyIndexer {
    property: String,
    index: EqualityIndex,
}

impl CustomPropertyIndexer {
    /// Indexes `property`'s normalized value under `index_name`.
    pub fn new(property: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self { property: property.into(), index: EqualityIndex::new(index_name) }
    }
}

impl Preprocessor for CustomPropertyIndexer {
    fn new_entity(&self, txn: &Transaction<'_>, identifier: Identifier, entity: &dyn Adaptor) -> Result<()> {
        if let Some(value) = entity.get(&self.property) {
            self.index.add(txn, &normalize(&value), identifier)?;
        }
        Ok(())
    }

    fn modified_entity(
        &self,
        txn: &Transaction<'_>,
        identifier: Identifier,
        old: &dyn Adaptor,
        new: &dyn Adaptor,
    ) -> Result<()> {
        if let Some(value) = old.get(&self.property) {
            self.index.remove(txn, &normalize(&value), identifier)?;
        }
        if let Some(value) = new.get(&self.property) {
            self.index.add(txn, &normalize(&value), identifier)?;
        }
        Ok(())
    }

    fn deleted_entity(&self, txn: &Transaction<'_>, identifier: Identifier, old: &dyn Adaptor) -> Result<()> {
        if let Some(value) = old.get(&self.property) {
            self.index.remove(txn, &normalize(&value), identifier)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{AccessMode, Environment};
    use crate::config::{Config, SyncMode};
    use crate::index::type_index::PropertyValue;
    use std::collections::HashMap as StdHashMap;
    use tempfile::tempdir;

    struct FakeEntity(StdHashMap<&'static str, PropertyValue>);

    impl Adaptor for FakeEntity {
        fn get(&self, property: &str) -> Option<PropertyValue> {
            self.0.get(property).cloned()
        }
        fn available_properties(&self) -> Vec<String> {
            vec!["folder".into()]
        }
    }

    fn env() -> (tempfile::TempDir, Environment) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.sink");
        (dir, Environment::open(&path, &Config::default()).unwrap())
    }

    #[test]
    fn default_indexer_maintains_type_index_through_lifecycle() {
        let (_dir, env) = env();
        let mut type_index = TypeIndex::new("mail");
        type_index.add_property("folder");
        let mut pipeline = Pipeline::new();
        pipeline.add(Box::new(DefaultIndexer::new(Arc::new(type_index))));

        let id = Identifier::new();
        let mut entity = StdHashMap::new();
        entity.insert("folder", PropertyValue::Text("inbox".into()));
        let old = FakeEntity(entity.clone());

        let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
        pipeline.new_entity(&txn, id, &old).unwrap();
        txn.commit().unwrap();

        let mut modified = StdHashMap::new();
        modified.insert("folder", PropertyValue::Text("archive".into()));
        let new = FakeEntity(modified);

        let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
        pipeline.modified_entity(&txn, id, &old, &new).unwrap();
        txn.commit().unwrap();

        let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
        let index = EqualityIndex::new("mail.index.folder");
        assert!(index.lookup(&txn, b"inbox").unwrap().is_empty());
        assert_eq!(index.lookup(&txn, b"archive").unwrap(), vec![id]);
    }

    #[test]
    fn custom_property_indexer_tracks_single_property() {
        let (_dir, env) = env();
        let mut pipeline = Pipeline::new();
        pipeline.add(Box::new(CustomPropertyIndexer::new("folder", "mail.aux.folder")));

        let id = Identifier::new();
        let mut props = StdHashMap::new();
        props.insert("folder", PropertyValue::Text("inbox".into()));
        let entity = FakeEntity(props);

        let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
        pipeline.new_entity(&txn, id, &entity).unwrap();
        txn.commit().unwrap();

        let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
        let index = EqualityIndex::new("mail.aux.folder");
        assert_eq!(index.lookup(&txn, b"inbox").unwrap(), vec![id]);
    }
}
