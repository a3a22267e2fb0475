//! # Graph Store
//!
//! The in-memory identifier/link graph for Filament.
//!
//! All data structures use `BTreeMap`/`BTreeSet` for deterministic ordering.
//! The graph is exclusively owned by its holder; every mutation flows through
//! the batch engine in [`crate::mutation`], and readers take a [`Graph::snapshot`].

use crate::{FilamentError, Identifier, LinkKey, Metadata};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// GRAPH
// =============================================================================

/// The identifier/link graph.
///
/// Invariants maintained by the mutating methods:
/// - a link exists only while both endpoint identifiers exist
/// - `adjacency` mirrors `links` exactly, in both directions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    /// Identifier metadata.
    identifiers: BTreeMap<Identifier, Metadata>,

    /// Link metadata, keyed by the normalized endpoint pair.
    links: BTreeMap<LinkKey, Metadata>,

    /// Neighbor sets: identifier -> identifiers it shares a link with.
    adjacency: BTreeMap<Identifier, BTreeSet<Identifier>>,
}

impl Graph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether an identifier exists.
    #[must_use]
    pub fn contains_identifier(&self, identifier: &Identifier) -> bool {
        self.identifiers.contains_key(identifier)
    }

    /// Get an identifier's metadata.
    #[must_use]
    pub fn metadata(&self, identifier: &Identifier) -> Option<&Metadata> {
        self.identifiers.get(identifier)
    }

    /// Check whether a link exists.
    #[must_use]
    pub fn contains_link(&self, key: &LinkKey) -> bool {
        self.links.contains_key(key)
    }

    /// Get a link's metadata.
    #[must_use]
    pub fn link_metadata(&self, key: &LinkKey) -> Option<&Metadata> {
        self.links.get(key)
    }

    /// Neighbors of an identifier in deterministic order.
    pub fn neighbors(&self, identifier: &Identifier) -> impl DoubleEndedIterator<Item = &Identifier> {
        self.adjacency
            .get(identifier)
            .into_iter()
            .flat_map(BTreeSet::iter)
    }

    /// All identifiers with their metadata, in deterministic order.
    pub fn identifiers(&self) -> impl Iterator<Item = (&Identifier, &Metadata)> {
        self.identifiers.iter()
    }

    /// All links with their metadata, in deterministic order.
    pub fn links(&self) -> impl Iterator<Item = (&LinkKey, &Metadata)> {
        self.links.iter()
    }

    /// Number of identifiers.
    #[must_use]
    pub fn identifier_count(&self) -> usize {
        self.identifiers.len()
    }

    /// Number of links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// An owned, immutable point-in-time copy of the graph.
    ///
    /// Searches run against a snapshot so concurrent mutation of the live
    /// graph never affects a traversal already underway.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    // =========================================================================
    // MUTATION (crate-internal: called by the batch engine)
    // =========================================================================

    /// Insert or replace an identifier's metadata.
    pub fn insert_identifier(&mut self, identifier: Identifier, metadata: Metadata) {
        self.adjacency.entry(identifier.clone()).or_default();
        self.identifiers.insert(identifier, metadata);
    }

    /// Remove an identifier, cascading removal of every incident link.
    ///
    /// Returns the removed link keys in deterministic order; empty if the
    /// identifier did not exist.
    pub fn remove_identifier(&mut self, identifier: &Identifier) -> Vec<LinkKey> {
        if self.identifiers.remove(identifier).is_none() {
            return Vec::new();
        }

        let neighbors = self.adjacency.remove(identifier).unwrap_or_default();
        let mut removed = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            if let Some(set) = self.adjacency.get_mut(&neighbor) {
                set.remove(identifier);
            }
            if let Some(key) = LinkKey::new(identifier.clone(), neighbor) {
                if self.links.remove(&key).is_some() {
                    removed.push(key);
                }
            }
        }
        removed
    }

    /// Insert or replace a link's metadata.
    ///
    /// Both endpoints must already exist.
    pub fn insert_link(&mut self, key: LinkKey, metadata: Metadata) -> Result<(), FilamentError> {
        let (a, b) = key.endpoints();
        for endpoint in [a, b] {
            if !self.identifiers.contains_key(endpoint) {
                return Err(FilamentError::IdentifierNotFound(endpoint.clone()));
            }
        }
        let (a, b) = (a.clone(), b.clone());
        self.adjacency.entry(a.clone()).or_default().insert(b.clone());
        self.adjacency.entry(b).or_default().insert(a);
        self.links.insert(key, metadata);
        Ok(())
    }

    /// Remove a link. Returns whether it existed.
    pub fn remove_link(&mut self, key: &LinkKey) -> bool {
        if self.links.remove(key).is_none() {
            return false;
        }
        let (a, b) = key.endpoints();
        if let Some(set) = self.adjacency.get_mut(a) {
            set.remove(b);
        }
        if let Some(set) = self.adjacency.get_mut(b) {
            set.remove(a);
        }
        true
    }
}

// =============================================================================
// SERIALIZATION SUPPORT
// =============================================================================

use serde::{Deserialize, Serialize};

/// Serializable representation of the graph for persistence.
///
/// Adjacency is derived state and is rebuilt on conversion back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableGraph {
    pub identifiers: Vec<(Identifier, Metadata)>,
    pub links: Vec<(Identifier, Identifier, Metadata)>,
}

impl From<&Graph> for SerializableGraph {
    fn from(graph: &Graph) -> Self {
        Self {
            identifiers: graph
                .identifiers
                .iter()
                .map(|(id, meta)| (id.clone(), meta.clone()))
                .collect(),
            links: graph
                .links
                .iter()
                .map(|(key, meta)| {
                    let (a, b) = key.endpoints();
                    (a.clone(), b.clone(), meta.clone())
                })
                .collect(),
        }
    }
}

impl From<SerializableGraph> for Graph {
    fn from(sg: SerializableGraph) -> Self {
        let mut graph = Graph::new();
        for (identifier, metadata) in sg.identifiers {
            graph.insert_identifier(identifier, metadata);
        }
        // Links referencing unknown endpoints or equal endpoints are dropped
        // rather than corrupting the adjacency invariant.
        for (a, b, metadata) in sg.links {
            if let Some(key) = LinkKey::new(a, b) {
                let _ = graph.insert_link(key, metadata);
            }
        }
        graph
    }
}

// =============================================================================
// TESTS
// =============================================================================
