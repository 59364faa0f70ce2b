//! B+tree environment (C2): `Environment -> Transaction -> NamedDatabase`.
//!
//! Backed by [`redb`], whose copy-on-write pages and MVCC snapshots already
//! give the guarantees spec.md §4.2 asks for: read-only transactions see a
//! fixed snapshot, at most one write transaction is active per environment,
//! and commit publishes a new snapshot atomically. Named sub-databases are
//! created dynamically at runtime (spec.md §3's "layout"), which `redb`'s
//! `'static`-named `TableDefinition` doesn't support directly — see
//! [`registry`] for how dynamic names are interned once into `'static`
//! strings, the same mechanism spec.md describes as a process-wide dbi
//! table.

pub(crate) mod registry;

use std::path::{Path, PathBuf};

use redb::{MultimapTableDefinition, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{ConstraintViolation, NotFoundError, Result, SinkError};

/// Access mode a transaction is opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Snapshot read, no writes allowed.
    ReadOnly,
    /// Exclusive write transaction.
    ReadWrite,
}

fn table_def(name: &str) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    TableDefinition::new(registry::table_names().intern(name))
}

fn multimap_def(name: &str) -> MultimapTableDefinition<'static, &'static [u8], &'static [u8]> {
    MultimapTableDefinition::new(registry::table_names().intern(name))
}

/// A process-wide memory-mapped store rooted at one file path.
///
/// Multiple `Environment::open` calls for the same canonical path within one
/// process share the same underlying `redb::Database` handle (see
/// [`registry::EnvironmentRegistry`]), matching the single-opener
/// requirement of the underlying store.
pub struct Environment {
    db: std::sync::Arc<redb::Database>,
    path: PathBuf,
}

impl Environment {
    /// Opens (creating if absent) the environment at `path`.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = registry::environments().get_or_open(&path, || redb::Database::builder().create(&path))?;
        debug!(sync_mode = ?config.sync_mode, "environment opened");
        Ok(Self { db, path })
    }

    /// Path this environment was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begins a transaction in the given mode.
    pub fn begin(&self, mode: AccessMode, sync_mode: crate::config::SyncMode) -> Result<Transaction<'_>> {
        match mode {
            AccessMode::ReadOnly => {
                let txn = self.db.begin_read()?;
                Ok(Transaction { inner: TxnInner::Read(txn), _marker: std::marker::PhantomData })
            }
            AccessMode::ReadWrite => {
                let mut txn = self.db.begin_write()?;
                txn.set_durability(sync_mode.to_redb_durability());
                Ok(Transaction { inner: TxnInner::Write(txn), _marker: std::marker::PhantomData })
            }
        }
    }

    /// Releases this process's shared handle so a subsequent `open` reopens
    /// the file from scratch. Used when an exclusive lock must be dropped.
    pub fn close(self) {
        registry::environments().forget(&self.path);
    }
}

enum TxnInner {
    Read(redb::ReadTransaction),
    Write(redb::WriteTransaction),
}

/// A read-only snapshot transaction, or the single read-write transaction
/// an environment allows at a time (spec.md §4.2).
pub struct Transaction<'env> {
    inner: TxnInner,
    _marker: std::marker::PhantomData<&'env Environment>,
}

impl<'env> Transaction<'env> {
    /// True if this is a write transaction.
    pub fn is_read_write(&self) -> bool {
        matches!(self.inner, TxnInner::Write(_))
    }

    /// Opens (creating if this is a write transaction and it's absent) the
    /// named database. `allow_duplicates` selects a multimap table.
    ///
    /// Databases may only be created by a write transaction (invariant 7);
    /// a read-only transaction opening a database that doesn't exist yet
    /// returns [`SinkError::NotFound`].
    pub fn open_database(&self, name: &str, allow_duplicates: bool) -> Result<NamedDatabase<'_>> {
        match &self.inner {
            TxnInner::Read(txn) => {
                if allow_duplicates {
                    let table = txn.open_multimap_table(multimap_def(name))?;
                    Ok(NamedDatabase::ReadMultimap(table))
                } else {
                    let table = txn.open_table(table_def(name))?;
                    Ok(NamedDatabase::Read(table))
                }
            }
            TxnInner::Write(txn) => {
                if allow_duplicates {
                    let table = txn.open_multimap_table(multimap_def(name))?;
                    Ok(NamedDatabase::WriteMultimap(table))
                } else {
                    let table = txn.open_table(table_def(name))?;
                    Ok(NamedDatabase::Write(table))
                }
            }
        }
    }

    /// Commits a write transaction. No-op check: calling this on a
    /// read-only transaction is a programmer error reported as
    /// [`SinkError::ReadOnlyError`].
    pub fn commit(self) -> Result<()> {
        match self.inner {
            TxnInner::Write(txn) => {
                txn.commit()?;
                Ok(())
            }
            TxnInner::Read(_) => Err(SinkError::ReadOnlyError("commit on read-only transaction".into())),
        }
    }

    /// Aborts a write transaction, discarding every database created and
    /// every write performed within it.
    pub fn abort(self) {
        if let TxnInner::Write(txn) = self.inner {
            if let Err(e) = txn.abort() {
                warn!(error = %e, "abort failed");
            }
        }
    }
}

/// A single keyspace inside one environment, opened either for reading or
/// writing, with or without duplicate-key support.
pub enum NamedDatabase<'txn> {
    /// Read-only, single-value-per-key.
    Read(redb::ReadOnlyTable<&'static [u8], &'static [u8]>),
    /// Read-only, multi-value-per-key (duplicates).
    ReadMultimap(redb::ReadOnlyMultimapTable<&'static [u8], &'static [u8]>),
    /// Writable, single-value-per-key.
    Write(redb::Table<'txn, &'static [u8], &'static [u8]>),
    /// Writable, multi-value-per-key (duplicates).
    WriteMultimap(redb::MultimapTable<'txn, &'static [u8], &'static [u8]>),
}

impl<'txn> NamedDatabase<'txn> {
    /// True if this database allows duplicate keys.
    pub fn allows_duplicates(&self) -> bool {
        matches!(self, NamedDatabase::ReadMultimap(_) | NamedDatabase::WriteMultimap(_))
    }

    /// Writes a value. For multimap databases this adds the pair; an
    /// identical pair written twice is deduplicated by the underlying store.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(ConstraintViolation::EmptyKey.into());
        }
        match self {
            NamedDatabase::Write(table) => {
                table.insert(key, value)?;
                Ok(())
            }
            NamedDatabase::WriteMultimap(table) => {
                table.insert(key, value)?;
                Ok(())
            }
            _ => Err(SinkError::ReadOnlyError("write on read-only database".into())),
        }
    }

    /// Removes all values for `key` (non-multimap) or is a precondition
    /// violation on a multimap database (use [`NamedDatabase::remove_pair`]
    /// there instead, per spec.md §4.2's duplicate-aware `remove`).
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        match self {
            NamedDatabase::Write(table) => {
                table.remove(key)?;
                Ok(())
            }
            NamedDatabase::WriteMultimap(table) => {
                table.remove_all(key)?;
                Ok(())
            }
            _ => Err(SinkError::ReadOnlyError("remove on read-only database".into())),
        }
    }

    /// Removes exactly one key-value pair from a multimap database.
    pub fn remove_pair(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self {
            NamedDatabase::WriteMultimap(table) => {
                table.remove(key, value)?;
                Ok(())
            }
            _ => Err(SinkError::GenericStorageError(
                "remove_pair requires a multimap database".into(),
            )),
        }
    }

    /// Scans the database. An empty `prefix` iterates everything in key
    /// order. With `substring_keys = false`, only entries whose key equals
    /// `prefix` are visited (every value, for multimap databases). With
    /// `substring_keys = true`, every entry whose key starts with `prefix`
    /// is visited. `on_pair` returns `false` to stop iteration early.
    pub fn scan(
        &self,
        prefix: &[u8],
        substring_keys: bool,
        mut on_pair: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<()> {
        match self {
            NamedDatabase::Read(table) => scan_table(table, prefix, substring_keys, &mut on_pair),
            NamedDatabase::Write(table) => scan_table(table, prefix, substring_keys, &mut on_pair),
            NamedDatabase::ReadMultimap(table) => {
                scan_multimap(table, prefix, substring_keys, &mut on_pair)
            }
            NamedDatabase::WriteMultimap(table) => {
                scan_multimap(table, prefix, substring_keys, &mut on_pair)
            }
        }
    }

    /// Seeks the greatest key that starts with `prefix` and invokes
    /// `on_pair` once with its (key, value). For multimap databases, the
    /// greatest *value* among that key's duplicates is used
    /// (`findLast`/`findLatest` distinction in spec.md §4.2 collapse to the
    /// same operation here since entity revisions are stored in a
    /// non-duplicate main table keyed by identifier⧺revision).
    pub fn find_latest(&self, prefix: &[u8], on_pair: impl FnOnce(&[u8], &[u8])) -> Result<bool> {
        let mut found = None;
        self.scan(prefix, true, |k, v| {
            found = Some((k.to_vec(), v.to_vec()));
            true // keep going; we want the greatest, so don't stop early
        })?;
        match found {
            Some((k, v)) => {
                on_pair(&k, &v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of entries in the database.
    pub fn len(&self) -> Result<u64> {
        let n = match self {
            NamedDatabase::Read(table) => table.len()?,
            NamedDatabase::Write(table) => table.len()?,
            NamedDatabase::ReadMultimap(table) => table.len()?,
            NamedDatabase::WriteMultimap(table) => table.len()?,
        };
        Ok(n)
    }

    /// True if the database has no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn scan_table<T: ReadableTable<&'static [u8], &'static [u8]>>(
    table: &T,
    prefix: &[u8],
    substring_keys: bool,
    on_pair: &mut impl FnMut(&[u8], &[u8]) -> bool,
) -> Result<()> {
    if prefix.is_empty() {
        for entry in table.range::<&[u8]>(..)? {
            let (k, v) = entry?;
            if !on_pair(k.value(), v.value()) {
                break;
            }
        }
        return Ok(());
    }
    for entry in table.range(prefix..)? {
        let (k, v) = entry?;
        let key = k.value();
        if substring_keys {
            if !key.starts_with(prefix) {
                break;
            }
        } else if key != prefix {
            break;
        }
        if !on_pair(key, v.value()) {
            break;
        }
    }
    Ok(())
}

fn scan_multimap<T: redb::ReadableMultimapTable<&'static [u8], &'static [u8]>>(
    table: &T,
    prefix: &[u8],
    substring_keys: bool,
    on_pair: &mut impl FnMut(&[u8], &[u8]) -> bool,
) -> Result<()> {
    if prefix.is_empty() {
        for key_entry in table.range::<&[u8]>(..)? {
            let (k, values) = key_entry?;
            let key = k.value().to_vec();
            for value in values {
                let v = value?;
                if !on_pair(&key, v.value()) {
                    return Ok(());
                }
            }
        }
        return Ok(());
    }
    for key_entry in table.range(prefix..)? {
        let (k, values) = key_entry?;
        let key = k.value().to_vec();
        if substring_keys {
            if !key.starts_with(prefix) {
                break;
            }
        } else if key.as_slice() != prefix {
            break;
        }
        for value in values {
            let v = value?;
            if !on_pair(&key, v.value()) {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Looks up `identifier` not found helper, used by higher layers that
/// translate an empty `find_latest` result into a typed not-found error.
pub fn not_found_identifier(display: impl Into<String>) -> SinkError {
    SinkError::NotFound(NotFoundError::Identifier(display.into()))
}
