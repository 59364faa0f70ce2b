//! Composite key model (C1): `Identifier`, `Revision`, and `Key`.
//!
//! Three views exist over the same data: the **internal** form, fixed-width
//! and lexicographically sorted the same as numeric order (used as on-disk
//! keys), and the **display** form, human-readable (used in logs). `Key`
//! concatenates an `Identifier` and a `Revision`; iterating the main table
//! in key order yields all revisions of one entity together, oldest first.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConstraintViolation, SinkError};

/// Internal byte width of an [`Identifier`].
pub const IDENTIFIER_INTERNAL_SIZE: usize = 16;
/// Display byte width of an [`Identifier`] (canonical `{8-4-4-4-12}` UUID form).
pub const IDENTIFIER_DISPLAY_SIZE: usize = 36;

/// Internal byte width of a [`Revision`] (19-byte zero-padded decimal).
pub const REVISION_INTERNAL_SIZE: usize = 19;

/// Internal byte width of a [`Key`]: identifier ⧺ revision.
pub const KEY_INTERNAL_SIZE: usize = IDENTIFIER_INTERNAL_SIZE + REVISION_INTERNAL_SIZE;

/// Opaque 128-bit identifier. Generated on entity creation, never reused,
/// never mutated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier(Uuid);

impl Identifier {
    /// Generates a fresh, random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil identifier. Used as a sentinel, never assigned to a real entity.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// True if this is the nil identifier.
    pub fn is_null(&self) -> bool {
        self.0.is_nil()
    }

    /// The 16-byte internal (on-disk) representation.
    pub fn to_internal_bytes(&self) -> [u8; IDENTIFIER_INTERNAL_SIZE] {
        *self.0.as_bytes()
    }

    /// Parses the 16-byte internal representation.
    ///
    /// Fails with [`SinkError::ConstraintViolation`] if `bytes` is not
    /// exactly [`IDENTIFIER_INTERNAL_SIZE`] long.
    pub fn from_internal_bytes(bytes: &[u8]) -> Result<Self, SinkError> {
        if bytes.len() != IDENTIFIER_INTERNAL_SIZE {
            return Err(ConstraintViolation::WrongLength {
                what: "identifier",
                expected: IDENTIFIER_INTERNAL_SIZE,
                got: bytes.len(),
            }
            .into());
        }
        let mut buf = [0u8; IDENTIFIER_INTERNAL_SIZE];
        buf.copy_from_slice(bytes);
        Ok(Self(Uuid::from_bytes(buf)))
    }

    /// The canonical `{8-4-4-4-12}` display string.
    pub fn to_display_string(&self) -> String {
        self.0.hyphenated().to_string()
    }

    /// Parses the canonical display string.
    pub fn from_display_str(s: &str) -> Result<Self, SinkError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ConstraintViolation::InvalidIdentifier(s.to_string()).into())
    }

    /// True if `bytes` is a well-formed internal identifier.
    pub fn is_valid_internal(bytes: &[u8]) -> bool {
        bytes.len() == IDENTIFIER_INTERNAL_SIZE
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.to_display_string())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

/// Monotonically increasing revision number, scoped to one resource's
/// environment. `0` is reserved to mean "none"; the first assigned revision
/// is `1`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    /// The "none" sentinel revision.
    pub const NONE: Revision = Revision(0);

    /// Wraps a raw revision number.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The next revision after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// The raw `u64` value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// True if this is [`Revision::NONE`].
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// The 19-byte zero-padded decimal internal encoding. Lexicographic
    /// order over this encoding matches numeric order over `u64`.
    pub fn to_internal_bytes(&self) -> [u8; REVISION_INTERNAL_SIZE] {
        let s = format!("{:019}", self.0);
        let mut buf = [0u8; REVISION_INTERNAL_SIZE];
        buf.copy_from_slice(s.as_bytes());
        buf
    }

    /// Parses the 19-byte zero-padded decimal encoding.
    pub fn from_internal_bytes(bytes: &[u8]) -> Result<Self, SinkError> {
        if bytes.len() != REVISION_INTERNAL_SIZE {
            return Err(ConstraintViolation::WrongLength {
                what: "revision",
                expected: REVISION_INTERNAL_SIZE,
                got: bytes.len(),
            }
            .into());
        }
        let s = std::str::from_utf8(bytes)
            .map_err(|_| ConstraintViolation::InvalidRevision)?;
        let value: u64 = s.parse().map_err(|_| ConstraintViolation::InvalidRevision)?;
        Ok(Self(value))
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite primary key of the main entity table: `Identifier ⧺ Revision`.
///
/// Lexicographic iteration over keys yields all revisions of one entity
/// grouped together, oldest first, because the identifier prefix dominates
/// ordering and the revision suffix then sorts within it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Key {
    identifier: Identifier,
    revision: Revision,
}

impl Key {
    /// Builds a key from its parts.
    pub fn new(identifier: Identifier, revision: Revision) -> Self {
        Self { identifier, revision }
    }

    /// The identifier component.
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// The revision component.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Returns a copy of this key with a different revision.
    pub fn with_revision(&self, revision: Revision) -> Self {
        Self { identifier: self.identifier, revision }
    }

    /// The 35-byte internal encoding: identifier bytes followed by revision bytes.
    pub fn to_internal_bytes(&self) -> [u8; KEY_INTERNAL_SIZE] {
        let mut buf = [0u8; KEY_INTERNAL_SIZE];
        buf[..IDENTIFIER_INTERNAL_SIZE].copy_from_slice(&self.identifier.to_internal_bytes());
        buf[IDENTIFIER_INTERNAL_SIZE..].copy_from_slice(&self.revision.to_internal_bytes());
        buf
    }

    /// Parses the 35-byte internal encoding.
    pub fn from_internal_bytes(bytes: &[u8]) -> Result<Self, SinkError> {
        if bytes.len() != KEY_INTERNAL_SIZE {
            return Err(ConstraintViolation::WrongLength {
                what: "key",
                expected: KEY_INTERNAL_SIZE,
                got: bytes.len(),
            }
            .into());
        }
        let identifier = Identifier::from_internal_bytes(&bytes[..IDENTIFIER_INTERNAL_SIZE])?;
        let revision = Revision::from_internal_bytes(&bytes[IDENTIFIER_INTERNAL_SIZE..])?;
        Ok(Self { identifier, revision })
    }

    /// The identifier-only prefix, used to scan every revision of one entity.
    pub fn prefix_for(identifier: Identifier) -> [u8; IDENTIFIER_INTERNAL_SIZE] {
        identifier.to_internal_bytes()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.identifier, self.revision)
    }
}
