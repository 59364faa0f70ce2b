//! Process-wide registries for environments and named-database dbi handles
//! (spec.md §4.2/§5).
//!
//! The underlying store mandates a single opener per process for a given
//! file: two independently opened `redb::Database` handles on the same path
//! would fight over the same lock file. [`EnvironmentRegistry`] keeps one
//! shared handle per canonical path so repeated [`super::Environment::open`]
//! calls within a process reuse it.
//!
//! `redb::TableDefinition`/`MultimapTableDefinition` names must be
//! `&'static str`. Named databases are declared dynamically (e.g.
//! `mail.index.subject`), so [`NameInterner`] leaks each distinct name once
//! and remembers the leaked reference — this is the "process-wide table of
//! open dbis keyed by environment path and database name" spec.md asks for.
//! Reads go through an `RwLock`; the leak itself is serialized by a
//! dedicated `Mutex`, matching the "dbi creation is globally serialized"
//! requirement even though redb itself does not require it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, RwLock};

use redb::Database;

use std::sync::Arc;

/// Shared, process-wide name interner for dynamically named tables.
#[derive(Default)]
pub(crate) struct NameInterner {
    names: RwLock<HashMap<String, &'static str>>,
    create_lock: Mutex<()>,
}

impl NameInterner {
    /// Returns a `'static` reference to `name`, leaking it into the process
    /// the first time it is seen.
    pub(crate) fn intern(&self, name: &str) -> &'static str {
        if let Some(existing) = self.names.read().unwrap().get(name) {
            return existing;
        }
        // Serialize the leak/insert critical section, matching the spec's
        // "dbi creation is globally serialized per process via a mutex".
        let _guard = self.create_lock.lock().unwrap();
        let mut names = self.names.write().unwrap();
        if let Some(existing) = names.get(name) {
            return existing;
        }
        let leaked: &'static str = Box::leak(name.to_string().into_boxed_str());
        names.insert(name.to_string(), leaked);
        leaked
    }

    /// Number of distinct names interned so far (test/diagnostic use).
    pub(crate) fn len(&self) -> usize {
        self.names.read().unwrap().len()
    }
}

/// Process-wide map of canonical path -> shared `redb::Database` handle.
#[derive(Default)]
pub(crate) struct EnvironmentRegistry {
    environments: RwLock<HashMap<PathBuf, Arc<Database>>>,
    open_lock: Mutex<()>,
}

impl EnvironmentRegistry {
    /// Returns the shared handle for `path`, opening it via `open_fn` if
    /// this is the first request for that path in this process.
    pub(crate) fn get_or_open<F>(&self, path: &PathBuf, open_fn: F) -> redb::Result<Arc<Database>, redb::DatabaseError>
    where
        F: FnOnce() -> redb::Result<Database, redb::DatabaseError>,
    {
        if let Some(existing) = self.environments.read().unwrap().get(path) {
            return Ok(existing.clone());
        }
        let _guard = self.open_lock.lock().unwrap();
        if let Some(existing) = self.environments.read().unwrap().get(path) {
            return Ok(existing.clone());
        }
        let db = Arc::new(open_fn()?);
        self.environments.write().unwrap().insert(path.clone(), db.clone());
        Ok(db)
    }

    /// Drops the shared handle for `path`, e.g. after an exclusive close.
    pub(crate) fn forget(&self, path: &PathBuf) {
        self.environments.write().unwrap().remove(path);
    }
}

static TABLE_NAMES: OnceLock<NameInterner> = OnceLock::new();
static ENVIRONMENTS: OnceLock<EnvironmentRegistry> = OnceLock::new();

pub(crate) fn table_names() -> &'static NameInterner {
    TABLE_NAMES.get_or_init(NameInterner::default)
}

pub(crate) fn environments() -> &'static EnvironmentRegistry {
    ENVIRONMENTS.get_or_init(EnvironmentRegistry::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_name_twice_returns_the_same_pointer() {
        let interner = NameInterner::default();
        let a = interner.intern("mail.index.subject");
        let b = interner.intern("mail.index.subject");
        assert_eq!(a.as_ptr(), b.as_ptr());
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn distinct_names_get_distinct_entries() {
        let interner = NameInterner::default();
        interner.intern("a");
        interner.intern("b");
        assert_eq!(interner.len(), 2);
    }
}
