//! Error taxonomy (spec.md §7).
//!
//! Eight kinds, not eight unrelated type names: `NotFound`,
//! `GenericStorageError`, `TransactionError`, `ReadOnlyError`, `IndexError`,
//! `ConstraintViolation`, `VersionMismatch`, `Conflict`. Propagation policy:
//! any error inside a write transaction aborts it and surfaces once to the
//! caller; `IndexError` is recovered locally by the query runner (downgrade
//! to a full scan); `TransactionError` is fatal at the process level.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SinkError>;

/// The error taxonomy from spec.md §7.
#[derive(Debug, Error)]
pub enum SinkError {
    /// A key, revision, identifier, or named database was absent.
    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// An underlying B+tree error not otherwise classified.
    #[error("storage error: {0}")]
    GenericStorageError(String),

    /// A write transaction's commit failed. Fatal: see [`SinkError::is_fatal`].
    #[error("transaction error: {0}")]
    TransactionError(String),

    /// A write was attempted against a read-only environment.
    #[error("read-only error: write attempted on read-only environment `{0}`")]
    ReadOnlyError(String),

    /// A secondary-index lookup failed.
    #[error("index error on `{index}`: {reason}")]
    IndexError {
        /// Name of the index database the lookup failed against.
        index: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Empty key, over-length key, or duplicate primary key on create.
    #[error("constraint violation: {0}")]
    ConstraintViolation(#[from] ConstraintViolation),

    /// The on-disk database version is incompatible with the running code.
    #[error("version mismatch: database is at version {found}, code expects {expected}")]
    VersionMismatch {
        /// Version the running code expects.
        expected: u32,
        /// Version recorded on disk.
        found: u32,
    },

    /// A `modify` was based on a stale revision.
    #[error("conflict: modify of `{identifier}` based on stale revision {base}, latest is {latest}")]
    Conflict {
        /// Display form of the identifier being modified.
        identifier: String,
        /// Revision the caller's modify was based on.
        base: u64,
        /// The actual latest revision at commit time.
        latest: u64,
    },
}

impl SinkError {
    /// True if this error must terminate the owning process, per the
    /// propagation policy in spec.md §7 ("the resource process must exit so
    /// that a supervisor can restart it and recover via change-replay").
    ///
    /// The core does not itself call `process::exit` — process lifecycle is
    /// out of scope (spec.md §1) — this predicate is the hook a host
    /// process is expected to check.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::TransactionError(_))
    }

    /// True if the query runner may recover by downgrading to a less
    /// specific plan (spec.md §7: "IndexError is recovered locally").
    pub fn is_recoverable_index_error(&self) -> bool {
        matches!(self, SinkError::IndexError { .. })
    }

    /// True if this is a not-found error (skippable in query materialization).
    pub fn is_not_found(&self) -> bool {
        matches!(self, SinkError::NotFound(_))
    }
}

/// What was not found.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// No live revision exists for this identifier.
    #[error("identifier `{0}` has no live revision")]
    Identifier(String),

    /// The named database does not exist in this environment.
    #[error("named database `{0}` does not exist")]
    Database(String),

    /// The requested revision does not exist in the revision log.
    #[error("revision {0} not found in revision log")]
    Revision(u64),

    /// No mapping exists for the given key in a synchronizer store lookup.
    #[error("no mapping for `{0}`")]
    Mapping(String),
}

/// Constraint violations: malformed or disallowed keys/values.
#[derive(Debug, Error)]
pub enum ConstraintViolation {
    /// A byte array had the wrong length for its type.
    #[error("{what} must be {expected} bytes, got {got}")]
    WrongLength {
        /// Name of the thing being decoded (`"identifier"`, `"revision"`, `"key"`).
        what: &'static str,
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        got: usize,
    },

    /// An identifier's display-form string did not parse as a UUID.
    #[error("invalid identifier: `{0}`")]
    InvalidIdentifier(String),

    /// A revision's internal bytes were not a valid zero-padded decimal.
    #[error("invalid revision encoding")]
    InvalidRevision,

    /// A key used for a write or lookup was empty.
    #[error("empty key is not allowed")]
    EmptyKey,

    /// `add` was called for an identifier that already has a live (non-tombstone) revision.
    #[error("entity `{0}` already exists")]
    AlreadyExists(String),
}

impl From<redb::Error> for SinkError {
    fn from(e: redb::Error) -> Self {
        SinkError::GenericStorageError(e.to_string())
    }
}

impl From<redb::DatabaseError> for SinkError {
    fn from(e: redb::DatabaseError) -> Self {
        SinkError::GenericStorageError(e.to_string())
    }
}

impl From<redb::TableError> for SinkError {
    fn from(e: redb::TableError) -> Self {
        match e {
            redb::TableError::TableDoesNotExist(name) => {
                SinkError::NotFound(NotFoundError::Database(name))
            }
            other => SinkError::GenericStorageError(other.to_string()),
        }
    }
}

impl From<redb::TransactionError> for SinkError {
    fn from(e: redb::TransactionError) -> Self {
        SinkError::TransactionError(e.to_string())
    }
}

impl From<redb::CommitError> for SinkError {
    fn from(e: redb::CommitError) -> Self {
        SinkError::TransactionError(e.to_string())
    }
}

impl From<redb::StorageError> for SinkError {
    fn from(e: redb::StorageError) -> Self {
        SinkError::GenericStorageError(e.to_string())
    }
}

impl From<bincode::Error> for SinkError {
    fn from(e: bincode::Error) -> Self {
        SinkError::GenericStorageError(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_error_is_fatal() {
        let err = SinkError::TransactionError("disk full".into());
        assert!(err.is_fatal());
    }

    #[test]
    fn not_found_is_not_fatal() {
        let err = SinkError::NotFound(NotFoundError::Identifier("x".into()));
        assert!(!err.is_fatal());
        assert!(err.is_not_found());
    }

    #[test]
    fn index_error_is_recoverable() {
        let err = SinkError::IndexError {
            index: "mail.index.subject".into(),
            reason: "corrupt".into(),
        };
        assert!(err.is_recoverable_index_error());
    }

    #[test]
    fn constraint_violation_converts() {
        let err: SinkError = ConstraintViolation::EmptyKey.into();
        assert!(matches!(err, SinkError::ConstraintViolation(_)));
    }
}
