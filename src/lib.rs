//! # sink-core
//!
//! Storage-and-query engine for a local-first PIM data store: a copy-on-write
//! KV environment, a revisioned entity store, secondary indexes
//! (equality/type/full-text), a preprocessor pipeline, a query runner with
//! live queries, a change-replay cursor, and a synchronizer store.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use sink_core::{Config, Environment, AccessMode, SyncMode};
//! use sink_core::store::{EntityStore, EntityRecord, Operation};
//! use sink_core::pipeline::Pipeline;
//!
//! let env = Environment::open("./mail.sink", &Config::default())?;
//! let store = EntityStore::new("mail", Pipeline::new());
//!
//! let txn = env.begin(AccessMode::ReadWrite, SyncMode::Normal)?;
//! let id = sink_core::key::Identifier::new();
//! store.add(&txn, id, EntityRecord::new(Operation::Create, Default::default()))?;
//! txn.commit()?;
//! ```
//!
//! ## Key concepts
//!
//! ### Entity
//!
//! An **entity** is a property-bag snapshot at a given [`key::Revision`],
//! identified by an opaque [`key::Identifier`]. See [`domain`] for the
//! concrete entity types (`mail`, `folder`, `event`, `account`, `identity`,
//! `resource`).
//!
//! ### Environment
//!
//! An **environment** ([`btree::Environment`]) is a copy-on-write B+tree
//! store holding one or more named databases, opened once per process per
//! path and shared across callers.
//!
//! ### Query
//!
//! A [`query::Query`] is planned against a [`index::TypeIndex`], materialized
//! against an [`store::EntityStore`], then filtered/reduced/sorted/limited by
//! [`query::QueryRunner`]. Setting [`query::QueryFlags::live_query`] keeps a
//! [`query::LiveQuery`] subscribed to further commits via a
//! [`query::RevisionNotifier`].
//!
//! ## Thread safety
//!
//! The core is single-threaded cooperative per resource (spec.md §5): one
//! environment accepts at most one open write transaction at a time, but
//! environments and the process-wide registries in [`btree::registry`] and
//! [`secret_store`] are `Send + Sync` and safely shared across threads via
//! `Arc`.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

pub mod btree;
pub mod changereplay;
pub mod config;
pub mod domain;
pub mod error;
pub mod index;
pub mod key;
pub mod pipeline;
pub mod query;
pub mod scalar;
pub mod secret_store;
pub mod store;
pub mod sync_store;
pub mod upgrade;

// ============================================================================
// Public API re-exports
// ============================================================================

// B+tree environment (C2)
pub use btree::{AccessMode, Environment, NamedDatabase, Transaction};

// Configuration
pub use config::{Config, DebugLevel, Layout, SyncMode, ValidationError};

// Error handling
pub use error::{ConstraintViolation, NotFoundError, Result, SinkError};

// Key model (C1)
pub use key::{Identifier, Key, Revision};

// Secondary indexes (C3, C4, C5)
pub use index::{Adaptor, Comparator, EqualityIndex, FulltextIndex, PropertyValue, TypeIndex};

// Entity store (C6)
pub use store::{EntityRecord, EntityStore, Operation};

// Pipeline / preprocessors (C7)
pub use pipeline::{DefaultIndexer, Pipeline, Preprocessor};

// Synchronizer store (C8)
pub use sync_store::SynchronizerStore;

// Query runner (C9)
pub use query::{ChangeEvent, LiveQuery, LiveResultSet, Query, QueryFlags, QueryResult, QueryRunner, Reduce, RevisionNotifier};

// Change-replay cursor (C10)
pub use changereplay::{ChangeReplay, ReplayOutcome};

// Upgrade / version gate (C11)
pub use upgrade::{Migration, UpgradeGate, VersionCheck};

// Entity type adaptors
pub use domain::{Entity, PropertyBag};

// Secret store
pub use secret_store::{secret_store, SecretStore};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common `sink-core` usage.
///
/// ```rust
/// use sink_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::btree::{AccessMode, Environment, Transaction};
    pub use crate::config::{Config, SyncMode};
    pub use crate::error::{Result, SinkError};
    pub use crate::index::{Adaptor, Comparator, PropertyValue, TypeIndex};
    pub use crate::key::{Identifier, Key, Revision};
    pub use crate::pipeline::Pipeline;
    pub use crate::query::{Query, QueryRunner};
    pub use crate::store::{EntityRecord, EntityStore, Operation};
}
