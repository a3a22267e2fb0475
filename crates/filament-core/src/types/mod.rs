//! # Core Type Definitions
//!
//! This module contains the foundational types for the Filament graph store:
//! - Graph keys (`Identifier`, `LinkKey`)
//! - The metadata value variant (`Metadata`)
//! - The metadata update variant (`MetadataUpdate`, `MetadataFn`)
//! - Mutation classification (`Persistence`)
//! - Error types (`FilamentError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` where they are used as `BTreeMap`/`BTreeSet` keys
//! - Normalize unordered link endpoints into a canonical order
//! - Carry no interior mutability

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// IDENTIFIER
// =============================================================================

/// Unique opaque key of a graph node.
///
/// Identifiers are created on first reference in a publish batch and deleted
/// explicitly; deleting an identifier removes every link touching it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier(pub String);

impl Identifier {
    /// Create a new identifier from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the identifier is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// LINK KEY
// =============================================================================

/// Canonical key of a link: an unordered pair of identifiers.
///
/// The pair is normalized on construction (lexicographically smaller endpoint
/// first) so that `LinkKey::new(a, b)` and `LinkKey::new(b, a)` compare equal
/// and index the same entry. A link between an identifier and itself cannot
/// be represented.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    a: Identifier,
    b: Identifier,
}

impl LinkKey {
    /// Create a normalized link key. Returns `None` if both endpoints are
    /// the same identifier.
    #[must_use]
    pub fn new(x: Identifier, y: Identifier) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(Self { a: x, b: y }),
            std::cmp::Ordering::Greater => Some(Self { a: y, b: x }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The two endpoints in canonical order.
    #[must_use]
    pub fn endpoints(&self) -> (&Identifier, &Identifier) {
        (&self.a, &self.b)
    }

    /// Check whether the link touches the given identifier.
    #[must_use]
    pub fn touches(&self, identifier: &Identifier) -> bool {
        &self.a == identifier || &self.b == identifier
    }

    /// The endpoint opposite to `identifier`, if `identifier` is an endpoint.
    #[must_use]
    pub fn other(&self, identifier: &Identifier) -> Option<&Identifier> {
        if &self.a == identifier {
            Some(&self.b)
        } else if &self.b == identifier {
            Some(&self.a)
        } else {
            None
        }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -- {}", self.a, self.b)
    }
}

// =============================================================================
// METADATA
// =============================================================================

/// Arbitrary structured metadata attached to identifiers and links.
///
/// Covers the JSON value space as a tagged union. Ordering of map keys is
/// deterministic (`BTreeMap`). Conversion to and from on-the-wire JSON is an
/// app-boundary concern; the core only stores and compares values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Metadata {
    /// The absent/default value. New entities start as `Null`.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number. Stored and compared, never computed with.
    Float(f64),
    /// A UTF-8 string.
    Str(String),
    /// An ordered sequence of values.
    Seq(Vec<Metadata>),
    /// An ordered string-keyed mapping.
    Map(BTreeMap<String, Metadata>),
}

impl Metadata {
    /// Create a string value.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Create an integer value.
    #[must_use]
    pub const fn int(v: i64) -> Self {
        Self::Int(v)
    }

    /// Check whether the value is `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

// =============================================================================
// METADATA UPDATE
// =============================================================================

/// A pure metadata update function: receives the current (pre-mutation)
/// metadata, `Null` included for entities created by the same batch, and
/// returns the value to store.
pub type MetadataFn = Arc<dyn Fn(&Metadata) -> Metadata + Send + Sync>;

/// What to do with an entity's metadata during a publish batch.
///
/// This is the three-sentinel protocol expressed as its own variant so the
/// metadata value space stays unpolluted: `Keep` retains the current value,
/// `Delete` removes the entity itself (cascading link removal for
/// identifiers), `Apply` merges through a caller-supplied function.
#[derive(Clone)]
pub enum MetadataUpdate {
    /// Store this literal value.
    Set(Metadata),
    /// Leave existing metadata unchanged.
    Keep,
    /// Remove the entity.
    Delete,
    /// Store the result of applying the function to the current metadata.
    Apply(MetadataFn),
}

impl MetadataUpdate {
    /// Resolve the update against the current metadata.
    ///
    /// Returns `None` for `Delete`; otherwise the value to store.
    #[must_use]
    pub fn resolve(&self, current: &Metadata) -> Option<Metadata> {
        match self {
            Self::Set(value) => Some(value.clone()),
            Self::Keep => Some(current.clone()),
            Self::Delete => None,
            Self::Apply(f) => Some(f(current)),
        }
    }

    /// Check whether the update is a deletion.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl fmt::Debug for MetadataUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(value) => f.debug_tuple("Set").field(value).finish(),
            Self::Keep => f.write_str("Keep"),
            Self::Delete => f.write_str("Delete"),
            Self::Apply(_) => f.write_str("Apply(<fn>)"),
        }
    }
}

impl From<Metadata> for MetadataUpdate {
    fn from(value: Metadata) -> Self {
        Self::Set(value)
    }
}

// =============================================================================
// PERSISTENCE CLASS
// =============================================================================

/// Classification of a publish batch.
///
/// `Persistent` batches are recorded in the durable store and may create
/// missing entities on demand. `Message` batches are ephemeral notifications:
/// every referenced entity must already exist, and nothing is durably
/// recorded — the in-memory view is updated identically in both cases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// Durably recorded; missing entities are created with `Null` metadata.
    Persistent,
    /// Ephemeral; referenced entities must already exist.
    #[default]
    Message,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors surfaced by the Filament graph store.
///
/// - No silent failures: every fallible operation returns `Result`
/// - Publish failures are atomic; no partial mutation is ever observable
#[derive(Debug, Error)]
pub enum FilamentError {
    /// The referenced identifier does not exist.
    #[error("identifier not found: {0}")]
    IdentifierNotFound(Identifier),

    /// The referenced link does not exist.
    #[error("link not found: {0}")]
    LinkNotFound(LinkKey),

    /// A publish entry has an invalid shape.
    #[error("malformed publish entry: {0}")]
    MalformedEntry(String),

    /// The graph owner is unreachable.
    #[error("graph owner unavailable")]
    Unavailable,

    /// A caller-supplied step/delta/delivery function reported failure.
    #[error("callback error: {0}")]
    Callback(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================
