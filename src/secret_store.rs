//! Process-wide secret store (spec.md §5): synchronizer passwords and other
//! credentials, insert/lookup only, no mutation after insert.
//!
//! Mirrors the `OnceLock`-initialized singleton pattern of
//! [`crate::btree::registry`] -- the same justification applies: this is
//! process-wide state by construction, not an ambient global reached for out
//! of convenience.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::error::{ConstraintViolation, Result, SinkError};

/// Secret material keyed by resource identifier. Once a resource's secret is
/// inserted it cannot be replaced; callers needing rotation must go through
/// a new resource identifier, matching spec.md §5's "insert/lookup only; no
/// mutation after insert".
#[derive(Default)]
pub struct SecretStore {
    secrets: RwLock<HashMap<String, Vec<u8>>>,
}

impl SecretStore {
    /// Inserts `secret` for `resource_id`. Fails with
    /// [`SinkError::ConstraintViolation`] if a secret is already recorded for
    /// that resource.
    pub fn insert(&self, resource_id: impl Into<String>, secret: Vec<u8>) -> Result<()> {
        let resource_id = resource_id.into();
        let mut secrets = self.secrets.write().unwrap();
        if secrets.contains_key(&resource_id) {
            return Err(SinkError::from(ConstraintViolation::AlreadyExists(resource_id)));
        }
        secrets.insert(resource_id, secret);
        Ok(())
    }

    /// Looks up the secret recorded for `resource_id`, if any.
    pub fn lookup(&self, resource_id: &str) -> Option<Vec<u8>> {
        self.secrets.read().unwrap().get(resource_id).cloned()
    }

    /// True if a secret has been recorded for `resource_id`.
    pub fn contains(&self, resource_id: &str) -> bool {
        self.secrets.read().unwrap().contains_key(resource_id)
    }
}

static SECRET_STORE: OnceLock<SecretStore> = OnceLock::new();

/// The process-wide secret store.
pub fn secret_store() -> &'static SecretStore {
    SECRET_STORE.get_or_init(SecretStore::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_returns_the_secret() {
        let store = SecretStore::default();
        store.insert("resource-1", b"hunter2".to_vec()).unwrap();
        assert_eq!(store.lookup("resource-1"), Some(b"hunter2".to_vec()));
    }

    #[test]
    fn lookup_of_unknown_resource_returns_none() {
        let store = SecretStore::default();
        assert_eq!(store.lookup("missing"), None);
    }

    #[test]
    fn inserting_twice_for_the_same_resource_fails() {
        let store = SecretStore::default();
        store.insert("resource-1", b"first".to_vec()).unwrap();
        let err = store.insert("resource-1", b"second".to_vec());
        assert!(err.is_err());
        assert_eq!(store.lookup("resource-1"), Some(b"first".to_vec()));
    }

    #[test]
    fn contains_reflects_prior_insert() {
        let store = SecretStore::default();
        assert!(!store.contains("r"));
        store.insert("r", b"x".to_vec()).unwrap();
        assert!(store.contains("r"));
    }
}
