//! Configuration for opening a resource environment.
//!
//! The [`Config`] struct controls durability and the debug-output level
//! (spec.md §6: `SINKDEBUGLEVEL`, `SINK_GDB_DEBUG`). The [`Layout`] struct
//! models spec.md §3's "set of expected databases per resource... declared
//! at open time as a layout": which entity types this environment stores,
//! and any auxiliary named databases a caller wants pre-registered.

use std::env;

use thiserror::Error;

/// Configuration validation failure. Distinct from [`crate::error::SinkError`]
/// since config validation happens before any environment is opened.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field held a value outside its allowed range.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

/// Debug output level, mirrored from `SINKDEBUGLEVEL` (spec.md §6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    /// Most verbose.
    Trace,
    /// Informational.
    #[default]
    Log,
    /// Warnings only.
    Warning,
    /// Errors only.
    Error,
}

impl DebugLevel {
    fn from_env_str(s: &str) -> Option<Self> {
        match s {
            "Trace" => Some(Self::Trace),
            "Log" => Some(Self::Log),
            "Warning" => Some(Self::Warning),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Commit durability mode for write transactions.
///
/// Maps directly onto `redb::Durability`: `Normal` is immediate fsync,
/// `Fast` defers the fsync to the next commit (faster, small crash-window),
/// `Paranoid` additionally fsyncs after every single write inside the
/// transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Durable on every commit. Default.
    #[default]
    Normal,
    /// Defers fsync; higher throughput, a crash can lose the last commit.
    Fast,
    /// Extra-durable; fsyncs more aggressively than `Normal`.
    Paranoid,
}

impl SyncMode {
    /// True for [`SyncMode::Paranoid`].
    pub fn is_paranoid(&self) -> bool {
        matches!(self, SyncMode::Paranoid)
    }

    /// True for [`SyncMode::Fast`].
    pub fn is_fast(&self) -> bool {
        matches!(self, SyncMode::Fast)
    }

    pub(crate) fn to_redb_durability(self) -> redb::Durability {
        match self {
            SyncMode::Normal => redb::Durability::Immediate,
            SyncMode::Fast => redb::Durability::Eventual,
            SyncMode::Paranoid => redb::Durability::Paranoid,
        }
    }
}

/// Declares the named databases an environment is expected to expose
/// (spec.md §3 "Named database"). Entity types are declared by name so the
/// entity store can eagerly ensure `<type>.main` exists; additional raw
/// database names may be declared for callers (e.g. synchronizer scratch
/// databases) that want them created up front rather than lazily.
#[derive(Clone, Debug, Default)]
pub struct Layout {
    /// Entity type names this environment stores, e.g. `["mail", "folder"]`.
    pub entity_types: Vec<String>,
    /// Additional named databases to ensure exist at open time.
    pub auxiliary_databases: Vec<String>,
}

impl Layout {
    /// An empty layout; databases are created lazily on first write.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A layout declaring the given entity types.
    pub fn with_entity_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: types.into_iter().map(Into::into).collect(),
            auxiliary_databases: Vec::new(),
        }
    }
}

/// Configuration for opening a resource's primary environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// Commit durability.
    pub sync_mode: SyncMode,
    /// Declared layout of named databases.
    pub layout: Layout,
    /// Debug output level.
    pub debug_level: DebugLevel,
    /// Pause at startup for debugger attach, from `SINK_GDB_DEBUG` (spec.md §6).
    pub gdb_debug: bool,
    /// Size, in megabytes, of the in-process page cache redb should keep.
    pub cache_size_mb: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            layout: Layout::empty(),
            debug_level: DebugLevel::default(),
            gdb_debug: false,
            cache_size_mb: 64,
        }
    }
}

impl Config {
    /// A config with the given layout, otherwise default.
    pub fn new(layout: Layout) -> Self {
        Self { layout, ..Self::default() }
    }

    /// Reads `SINKDEBUGLEVEL` and `SINK_GDB_DEBUG` from the process
    /// environment and overlays them onto `Config::default()`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = env::var("SINKDEBUGLEVEL") {
            if let Some(parsed) = DebugLevel::from_env_str(&level) {
                config.debug_level = parsed;
            }
        }
        config.gdb_debug = env::var("SINK_GDB_DEBUG").is_ok();
        config
    }

    /// Validates configuration invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cache_size_mb == 0 {
            return Err(ValidationError::InvalidField {
                field: "cache_size_mb",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
