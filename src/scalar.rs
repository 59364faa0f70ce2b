//! Single-value scalars persisted in a named database, one entry per key.
//!
//! Mirrors the teacher's metadata-table convention (`storage/schema.rs`'s
//! `METADATA_TABLE`, one fixed string key per scalar, bincode-serialized
//! value): `<resource>.__metadata`'s `maxRevision` (C6), `<resource>
//! .changereplay`'s `lastReplayedRevision` (C10), and `<resource>
//! .__metadata`'s `databaseVersion` (C11) are all read/written through
//! this helper rather than three separate ad hoc encodings.

use crate::btree::Transaction;
use crate::error::Result;

/// Reads the `u64` stored under `key` in database `db_name`, or `default` if
/// absent.
pub fn read_u64(txn: &Transaction<'_>, db_name: &str, key: &str, default: u64) -> Result<u64> {
    let db = match txn.open_database(db_name, false) {
        Ok(db) => db,
        Err(e) if e.is_not_found() => return Ok(default),
        Err(e) => return Err(e),
    };
    let mut value = default;
    db.scan(key.as_bytes(), false, |_, v| {
        if let Ok(bytes) = v.try_into() {
            value = u64::from_be_bytes(bytes);
        }
        false
    })?;
    Ok(value)
}

/// Writes `value` under `key` in database `db_name`.
pub fn write_u64(txn: &Transaction<'_>, db_name: &str, key: &str, value: u64) -> Result<()> {
    let mut db = txn.open_database(db_name, false)?;
    db.write(key.as_bytes(), &value.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{AccessMode, Environment};
    use crate::config::{Config, SyncMode};
    use tempfile::tempdir;

    fn env() -> (tempfile::TempDir, Environment) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scalar.sink");
        (dir, Environment::open(&path, &Config::default()).unwrap())
    }

    #[test]
    fn missing_scalar_returns_default() {
        let (_dir, env) = env();
        let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
        assert_eq!(read_u64(&txn, "__metadata", "maxRevision", 0).unwrap(), 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, env) = env();
        let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal).unwrap();
        write_u64(&txn, "__metadata", "maxRevision", 42).unwrap();
        txn.commit().unwrap();

        let txn = env.begin(AccessMode::ReadOnly, SyncMode::Normal).unwrap();
        assert_eq!(read_u64(&txn, "__metadata", "maxRevision", 0).unwrap(), 42);
    }
}
