//! Change-replay cursor (C10): drives an external synchronizer's replay
//! loop off the shared revision log, independent of entity type.
//!
//! Grounded in spec.md §4.10. A dedicated [`Environment`] holds one scalar,
//! `lastReplayedRevision`, in its `__metadata` database (see
//! [`crate::scalar`]); the revision log itself (`revisions`/`revisionType`)
//! and each type's `<type>.main` table live in the resource's main
//! environment.

use tracing::{instrument, warn};

use crate::btree::{AccessMode, Environment};
use crate::config::{Config, SyncMode};
use crate::error::Result;
use crate::key::{Identifier, Key, Revision};
use crate::scalar;
use crate::store::{read_latest_record, EntityRecord};

const CHANGEREPLAY_METADATA_DB: &str = "__metadata";
const LAST_REPLAYED_KEY: &str = "lastReplayedRevision";
const MAX_REVISION_DB: &str = "__metadata";
const MAX_REVISION_KEY: &str = "maxRevision";
const REVISIONS_DB: &str = "revisions";
const REVISION_TYPE_DB: &str = "revisionType";

/// Outcome of one call to [`ChangeReplay::replay`].
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    /// Number of revisions successfully replayed this call.
    pub replayed: u64,
    /// The revision replay stopped at (inclusive), whether due to running
    /// out of new revisions or a callback failure.
    pub stopped_at: Revision,
}

/// Tracks replay progress against a resource's revision log in a dedicated
/// environment, so the cursor itself survives independently of the main
/// environment's lifecycle.
pub struct ChangeReplay {
    cursor_env: Environment,
}

impl ChangeReplay {
    /// Opens (creating if absent) the dedicated `<resource>.changereplay`
    /// environment.
    pub fn open(path: impl AsRef<std::path::Path>, config: &Config) -> Result<Self> {
        Ok(Self { cursor_env: Environment::open(path, config)? })
    }

    /// The last revision successfully replayed, or `0` if replay has never
    /// run.
    pub fn last_replayed_revision(&self) -> Result<Revision> {
        let txn = self.cursor_env.begin(AccessMode::ReadOnly, SyncMode::Normal)?;
        Ok(Revision::new(scalar::read_u64(&txn, CHANGEREPLAY_METADATA_DB, LAST_REPLAYED_KEY, 0)?))
    }

    /// Replays every revision in `(lastReplayedRevision, maxRevision]` of
    /// `main_env` through `replay_fn`, advancing the cursor past every
    /// revision replay succeeds for.
    ///
    /// `replay_fn` receives the entity type the revision belongs to, the
    /// `identifier ⧺ revision` key, and the record at that revision. If it
    /// returns `Err`, replay stops at the prior revision so the next call
    /// retries starting there (spec.md §4.10).
    #[instrument(skip(self, main_env, replay_fn))]
    pub fn replay(
        &self,
        main_env: &Environment,
        mut replay_fn: impl FnMut(&str, Key, &EntityRecord) -> Result<()>,
    ) -> Result<ReplayOutcome> {
        let last_replayed = self.last_replayed_revision()?;
        let main_txn = main_env.begin(AccessMode::ReadOnly, SyncMode::Normal)?;
        let max_revision = Revision::new(scalar::read_u64(&main_txn, MAX_REVISION_DB, MAX_REVISION_KEY, 0)?);

        if max_revision.value() <= last_replayed.value() {
            return Ok(ReplayOutcome { replayed: 0, stopped_at: last_replayed });
        }

        let revisions = main_txn.open_database(REVISIONS_DB, false)?;
        let revision_types = main_txn.open_database(REVISION_TYPE_DB, false)?;

        let mut stopped_at = last_replayed;
        let mut replayed = 0u64;
        let lower = last_replayed.next();

        let mut failed = false;
        revisions.scan(&[], false, |k, v| {
            if failed {
                return false;
            }
            let (Ok(revision), Ok(identifier)) = (Revision::from_internal_bytes(k), Identifier::from_internal_bytes(v))
            else {
                return true;
            };
            if revision.value() < lower.value() {
                return true;
            }
            if revision.value() > max_revision.value() {
                return false;
            }

            let mut entity_type = None;
            let _ = revision_types.scan(&revision.to_internal_bytes(), false, |_, type_bytes| {
                entity_type = std::str::from_utf8(type_bytes).ok().map(str::to_string);
                false
            });
            let Some(entity_type) = entity_type else {
                warn!(%revision, "no recorded type for revision, skipping");
                stopped_at = revision;
                replayed += 1;
                return true;
            };

            let record = match read_latest_record(&main_txn, &entity_type, identifier) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    stopped_at = revision;
                    replayed += 1;
                    return true;
                }
                Err(e) => {
                    warn!(%revision, error = %e, "failed to read record for replay");
                    failed = true;
                    return false;
                }
            };

            let key = Key::new(identifier, revision);
            match replay_fn(&entity_type, key, &record) {
                Ok(()) => {
                    stopped_at = revision;
                    replayed += 1;
                    true
                }
                Err(e) => {
                    warn!(%revision, error = %e, "replay callback failed, cursor will retry from here");
                    failed = true;
                    false
                }
            }
        })?;

        if stopped_at.value() > last_replayed.value() {
            let cursor_txn = self.cursor_env.begin(AccessMode::ReadWrite, SyncMode::Normal)?;
            scalar::write_u64(&cursor_txn, CHANGEREPLAY_METADATA_DB, LAST_REPLAYED_KEY, stopped_at.value())?;
            cursor_txn.commit()?;
        }

        Ok(ReplayOutcome { replayed, stopped_at })
    }
}
