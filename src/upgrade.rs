//! Upgrade / version gate (C11): every environment's `databaseVersion`
//! scalar in `__metadata`, checked on open and advanced by registered
//! migrations.
//!
//! Grounded in spec.md §4.11. Downgrade (database newer than the running
//! code) is never recoverable here and reported as
//! [`crate::error::SinkError::VersionMismatch`]; an older or absent version
//! blocks writes until [`UpgradeGate::upgrade`] runs.

use tracing::info;

use crate::btree::Transaction;
use crate::error::{Result, SinkError};
use crate::scalar;

const METADATA_DB: &str = "__metadata";
const VERSION_KEY: &str = "databaseVersion";

/// One schema migration, producing the environment at [`Self::version`]
/// from whatever the prior migration (or the original schema) left behind.
pub trait Migration: Send + Sync {
    /// The version this migration's output corresponds to.
    fn version(&self) -> u32;

    /// Applies the migration within the given write transaction.
    fn migrate(&self, txn: &Transaction<'_>) -> Result<()>;
}

/// Outcome of checking an environment's version against the running code.
#[derive(Debug, PartialEq, Eq)]
pub enum VersionCheck {
    /// The database is already at the current version; proceed normally.
    UpToDate,
    /// The database is older (or has never been versioned); call
    /// [`UpgradeGate::upgrade`] before allowing writes.
    NeedsUpgrade {
        /// The version found on disk, or `0` if absent.
        found: u32,
    },
}

/// Gates access to an environment by its on-disk schema version.
pub struct UpgradeGate {
    current_version: u32,
    migrations: Vec<Box<dyn Migration>>,
}

impl UpgradeGate {
    /// Creates a gate for the running code's `current_version`, with no
    /// migrations registered yet.
    pub fn new(current_version: u32) -> Self {
        Self { current_version, migrations: Vec::new() }
    }

    /// Registers a migration. Migrations run in registration order, so
    /// register them in ascending version order.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> &mut Self {
        self.migrations.push(migration);
        self
    }

    /// Checks the version recorded in `txn`'s environment.
    ///
    /// Fails with [`SinkError::VersionMismatch`] if the on-disk version is
    /// newer than `current_version` (downgrade is not supported).
    pub fn check(&self, txn: &Transaction<'_>) -> Result<VersionCheck> {
        let found = scalar::read_u64(txn, METADATA_DB, VERSION_KEY, 0)? as u32;
        if found > self.current_version {
            return Err(SinkError::VersionMismatch { expected: self.current_version, found });
        }
        if found == self.current_version {
            Ok(VersionCheck::UpToDate)
        } else {
            Ok(VersionCheck::NeedsUpgrade { found })
        }
    }

    /// Re-runs every registered migration whose version is greater than
    /// the on-disk version, in registration order, then writes
    /// `current_version`. Must run inside a write transaction; migration
    /// failures abort the whole upgrade (the version scalar is not
    /// advanced, so the next attempt retries from the original version).
    pub fn upgrade(&self, txn: &Transaction<'_>) -> Result<()> {
        let found = scalar::read_u64(txn, METADATA_DB, VERSION_KEY, 0)? as u32;
        if found > self.current_version {
            return Err(SinkError::VersionMismatch { expected: self.current_version, found });
        }
        for migration in &self.migrations {
            if migration.version() <= found {
                continue;
            }
            info!(to_version = migration.version(), "running migration");
            migration.migrate(txn)?;
        }
        scalar::write_u64(txn, METADATA_DB, VERSION_KEY, self.current_version as u64)
    }
}
