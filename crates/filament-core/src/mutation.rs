//! # Mutation Engine
//!
//! Batch validation and application for the Filament graph: the publish
//! protocol.
//!
//! A batch is all-or-nothing: validation runs against the pre-batch graph,
//! application happens on a working copy, and the caller swaps the copy in
//! only on success. All identifier/endpoint updates apply before any link
//! update, in entry order.

use crate::graph::Graph;
use crate::primitives::{MAX_BATCH_LENGTH, MAX_IDENTIFIER_LENGTH};
use crate::{FilamentError, Identifier, LinkKey, Metadata, MetadataUpdate, Persistence};
use std::collections::BTreeSet;

// =============================================================================
// PUBLISH ENTRIES
// =============================================================================

/// A link endpoint: an identifier plus what to do with its metadata.
///
/// A bare identifier leaves metadata untouched (`Keep`).
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub identifier: Identifier,
    pub update: MetadataUpdate,
}

impl Endpoint {
    /// An endpoint that leaves the identifier's metadata untouched.
    #[must_use]
    pub fn bare(identifier: impl Into<Identifier>) -> Self {
        Self {
            identifier: identifier.into(),
            update: MetadataUpdate::Keep,
        }
    }

    /// An endpoint carrying a metadata update.
    #[must_use]
    pub fn with(identifier: impl Into<Identifier>, update: impl Into<MetadataUpdate>) -> Self {
        Self {
            identifier: identifier.into(),
            update: update.into(),
        }
    }
}

/// Argument adapter so entry constructors accept either a literal
/// [`Metadata`] value or a full [`MetadataUpdate`].
#[derive(Debug, Clone)]
pub struct MetadataUpdateArg(MetadataUpdate);

impl From<Metadata> for MetadataUpdateArg {
    fn from(value: Metadata) -> Self {
        Self(MetadataUpdate::Set(value))
    }
}

impl From<MetadataUpdate> for MetadataUpdateArg {
    fn from(value: MetadataUpdate) -> Self {
        Self(value)
    }
}

/// One element of a publish batch.
#[derive(Debug, Clone)]
pub enum PublishEntry {
    /// Mutate a single identifier.
    Identifier(Endpoint),
    /// Mutate a link (and, through its endpoints, the two identifiers).
    Link(Endpoint, Endpoint, MetadataUpdate),
}

impl PublishEntry {
    /// Identifier mutation entry.
    #[must_use]
    pub fn identifier(identifier: impl Into<Identifier>, update: impl Into<MetadataUpdateArg>) -> Self {
        Self::Identifier(Endpoint {
            identifier: identifier.into(),
            update: update.into().0,
        })
    }

    /// Link mutation entry between two bare endpoints.
    #[must_use]
    pub fn link(
        a: impl Into<Identifier>,
        b: impl Into<Identifier>,
        update: impl Into<MetadataUpdateArg>,
    ) -> Self {
        Self::Link(Endpoint::bare(a), Endpoint::bare(b), update.into().0)
    }

    /// Link mutation entry with explicit endpoint updates.
    #[must_use]
    pub fn link_with(a: Endpoint, b: Endpoint, update: impl Into<MetadataUpdateArg>) -> Self {
        Self::Link(a, b, update.into().0)
    }
}

/// Options for a publish batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub persistence: Persistence,
}

impl PublishOptions {
    /// Durably recorded batch; missing entities created on demand.
    #[must_use]
    pub const fn persistent() -> Self {
        Self {
            persistence: Persistence::Persistent,
        }
    }

    /// Ephemeral batch; referenced entities must already exist.
    #[must_use]
    pub const fn message() -> Self {
        Self {
            persistence: Persistence::Message,
        }
    }
}

// =============================================================================
// MUTATION EVENT
// =============================================================================

/// One resolved change applied by a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphChange {
    IdentifierSet(Identifier, Metadata),
    IdentifierDeleted(Identifier),
    LinkSet(LinkKey, Metadata),
    LinkDeleted(LinkKey),
}

/// Emitted once per committed batch, after the graph swap.
///
/// Consumed by the durable layer (persistent class only) and by the
/// subscription manager's coarse relevance filter.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub persistence: Persistence,
    pub changes: Vec<GraphChange>,
}

impl MutationEvent {
    /// Every identifier touched by the batch, endpoints of affected links
    /// included.
    #[must_use]
    pub fn affected_identifiers(&self) -> BTreeSet<Identifier> {
        let mut affected = BTreeSet::new();
        for change in &self.changes {
            match change {
                GraphChange::IdentifierSet(id, _) | GraphChange::IdentifierDeleted(id) => {
                    affected.insert(id.clone());
                }
                GraphChange::LinkSet(key, _) | GraphChange::LinkDeleted(key) => {
                    let (a, b) = key.endpoints();
                    affected.insert(a.clone());
                    affected.insert(b.clone());
                }
            }
        }
        affected
    }

    /// Every link touched by the batch.
    #[must_use]
    pub fn affected_links(&self) -> BTreeSet<LinkKey> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                GraphChange::LinkSet(key, _) | GraphChange::LinkDeleted(key) => Some(key.clone()),
                GraphChange::IdentifierSet(..) | GraphChange::IdentifierDeleted(_) => None,
            })
            .collect()
    }

    /// Whether the batch resolved to no observable change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// =============================================================================
// MUTATION ENGINE
// =============================================================================

/// The MutationEngine validates and applies publish batches.
pub struct MutationEngine;

impl MutationEngine {
    /// Validate `entries` against `graph` and produce the post-batch graph
    /// plus the event describing what changed.
    ///
    /// The input graph is never mutated; on error nothing is observable.
    pub fn apply(
        graph: &Graph,
        entries: &[PublishEntry],
        options: &PublishOptions,
    ) -> Result<(Graph, MutationEvent), FilamentError> {
        Self::validate_shape(entries)?;
        if options.persistence == Persistence::Message {
            Self::validate_existence(graph, entries)?;
        }

        let mut next = graph.clone();
        let mut changes = Vec::new();

        // Pass 1: identifier/endpoint updates, in entry order.
        for entry in entries {
            match entry {
                PublishEntry::Identifier(endpoint) => {
                    Self::apply_endpoint(&mut next, endpoint, options.persistence, &mut changes)?;
                }
                PublishEntry::Link(a, b, _) => {
                    Self::apply_endpoint(&mut next, a, options.persistence, &mut changes)?;
                    Self::apply_endpoint(&mut next, b, options.persistence, &mut changes)?;
                }
            }
        }

        // Pass 2: link updates, in entry order.
        for entry in entries {
            if let PublishEntry::Link(a, b, update) = entry {
                Self::apply_link(
                    &mut next,
                    &a.identifier,
                    &b.identifier,
                    update,
                    options.persistence,
                    &mut changes,
                )?;
            }
        }

        let event = MutationEvent {
            persistence: options.persistence,
            changes,
        };
        Ok((next, event))
    }

    /// Reject malformed batches before touching any state.
    fn validate_shape(entries: &[PublishEntry]) -> Result<(), FilamentError> {
        if entries.len() > MAX_BATCH_LENGTH {
            return Err(FilamentError::MalformedEntry(format!(
                "batch of {} entries exceeds maximum {}",
                entries.len(),
                MAX_BATCH_LENGTH
            )));
        }

        for entry in entries {
            match entry {
                PublishEntry::Identifier(endpoint) => {
                    Self::validate_identifier(&endpoint.identifier)?;
                }
                PublishEntry::Link(a, b, _) => {
                    Self::validate_identifier(&a.identifier)?;
                    Self::validate_identifier(&b.identifier)?;
                    if a.identifier == b.identifier {
                        return Err(FilamentError::MalformedEntry(format!(
                            "link endpoints must differ, got '{}' twice",
                            a.identifier
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_identifier(identifier: &Identifier) -> Result<(), FilamentError> {
        if identifier.is_empty() {
            return Err(FilamentError::MalformedEntry(
                "empty identifier".to_string(),
            ));
        }
        if identifier.as_str().len() > MAX_IDENTIFIER_LENGTH {
            return Err(FilamentError::MalformedEntry(format!(
                "identifier length {} exceeds maximum {} bytes",
                identifier.as_str().len(),
                MAX_IDENTIFIER_LENGTH
            )));
        }
        Ok(())
    }

    /// Message-class existence rule: every referenced identifier and link
    /// must already exist in the pre-batch graph.
    fn validate_existence(graph: &Graph, entries: &[PublishEntry]) -> Result<(), FilamentError> {
        for entry in entries {
            match entry {
                PublishEntry::Identifier(endpoint) => {
                    if !graph.contains_identifier(&endpoint.identifier) {
                        return Err(FilamentError::IdentifierNotFound(
                            endpoint.identifier.clone(),
                        ));
                    }
                }
                PublishEntry::Link(a, b, _) => {
                    for endpoint in [a, b] {
                        if !graph.contains_identifier(&endpoint.identifier) {
                            return Err(FilamentError::IdentifierNotFound(
                                endpoint.identifier.clone(),
                            ));
                        }
                    }
                    if let Some(key) = LinkKey::new(a.identifier.clone(), b.identifier.clone()) {
                        if !graph.contains_link(&key) {
                            return Err(FilamentError::LinkNotFound(key));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_endpoint(
        next: &mut Graph,
        endpoint: &Endpoint,
        persistence: Persistence,
        changes: &mut Vec<GraphChange>,
    ) -> Result<(), FilamentError> {
        let identifier = &endpoint.identifier;

        if endpoint.update.is_delete() {
            // Deleting an entity that is already gone resolves to nothing,
            // for both classes (message existence was checked pre-batch).
            if next.contains_identifier(identifier) {
                for key in next.remove_identifier(identifier) {
                    changes.push(GraphChange::LinkDeleted(key));
                }
                changes.push(GraphChange::IdentifierDeleted(identifier.clone()));
            }
            return Ok(());
        }

        match next.metadata(identifier) {
            Some(current) => {
                if matches!(endpoint.update, MetadataUpdate::Keep) {
                    return Ok(());
                }
                if let Some(resolved) = endpoint.update.resolve(current) {
                    next.insert_identifier(identifier.clone(), resolved.clone());
                    changes.push(GraphChange::IdentifierSet(identifier.clone(), resolved));
                }
            }
            None => {
                // An earlier entry in this batch deleted it, or it never
                // existed. Message class may not resurrect entities.
                if persistence == Persistence::Message {
                    return Err(FilamentError::IdentifierNotFound(identifier.clone()));
                }
                if let Some(resolved) = endpoint.update.resolve(&Metadata::Null) {
                    next.insert_identifier(identifier.clone(), resolved.clone());
                    changes.push(GraphChange::IdentifierSet(identifier.clone(), resolved));
                }
            }
        }
        Ok(())
    }

    fn apply_link(
        next: &mut Graph,
        a: &Identifier,
        b: &Identifier,
        update: &MetadataUpdate,
        persistence: Persistence,
        changes: &mut Vec<GraphChange>,
    ) -> Result<(), FilamentError> {
        let Some(key) = LinkKey::new(a.clone(), b.clone()) else {
            return Err(FilamentError::MalformedEntry(format!(
                "link endpoints must differ, got '{a}' twice"
            )));
        };

        if update.is_delete() {
            if next.remove_link(&key) {
                changes.push(GraphChange::LinkDeleted(key));
            }
            return Ok(());
        }

        // Endpoints must exist post identifier-mutation; the persistent
        // class recreates on demand what the batch itself removed.
        for endpoint in [a, b] {
            if !next.contains_identifier(endpoint) {
                if persistence == Persistence::Message {
                    return Err(FilamentError::IdentifierNotFound(endpoint.clone()));
                }
                next.insert_identifier(endpoint.clone(), Metadata::Null);
                changes.push(GraphChange::IdentifierSet(endpoint.clone(), Metadata::Null));
            }
        }

        match next.link_metadata(&key) {
            Some(current) => {
                if matches!(update, MetadataUpdate::Keep) {
                    return Ok(());
                }
                if let Some(resolved) = update.resolve(current) {
                    next.insert_link(key.clone(), resolved.clone())?;
                    changes.push(GraphChange::LinkSet(key, resolved));
                }
            }
            None => {
                if persistence == Persistence::Message {
                    return Err(FilamentError::LinkNotFound(key));
                }
                if let Some(resolved) = update.resolve(&Metadata::Null) {
                    next.insert_link(key.clone(), resolved.clone())?;
                    changes.push(GraphChange::LinkSet(key, resolved));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetadataFn;
    use std::sync::Arc;

    fn id(s: &str) -> Identifier {
        Identifier::new(s)
    }

    fn key(a: &str, b: &str) -> LinkKey {
        LinkKey::new(id(a), id(b)).expect("key")
    }

    fn seeded() -> Graph {
        let entries = vec![
            PublishEntry::identifier("a", Metadata::int(1)),
            PublishEntry::link("a", "b", Metadata::str("wire")),
        ];
        let (graph, _) = MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent())
            .expect("seed");
        graph
    }

    #[test]
    fn persistent_creates_missing_with_null_default() {
        let entries = vec![PublishEntry::link("a", "b", MetadataUpdate::Keep)];
        let (graph, event) =
            MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent())
                .expect("apply");

        assert_eq!(graph.metadata(&id("a")), Some(&Metadata::Null));
        assert_eq!(graph.metadata(&id("b")), Some(&Metadata::Null));
        assert_eq!(graph.link_metadata(&key("a", "b")), Some(&Metadata::Null));
        assert_eq!(event.affected_links().len(), 1);
    }

    #[test]
    fn message_rejects_missing_identifier() {
        let entries = vec![PublishEntry::identifier("ghost", Metadata::int(1))];
        let err = MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::message());
        assert!(matches!(err, Err(FilamentError::IdentifierNotFound(_))));
    }

    #[test]
    fn message_rejects_missing_link() {
        let mut graph = Graph::new();
        graph.insert_identifier(id("a"), Metadata::Null);
        graph.insert_identifier(id("b"), Metadata::Null);

        let entries = vec![PublishEntry::link("a", "b", Metadata::str("x"))];
        let err = MutationEngine::apply(&graph, &entries, &PublishOptions::message());
        assert!(matches!(err, Err(FilamentError::LinkNotFound(_))));
    }

    #[test]
    fn message_updates_existing_in_memory_only_semantics() {
        let graph = seeded();
        let entries = vec![PublishEntry::identifier("a", Metadata::int(2))];
        let (next, event) =
            MutationEngine::apply(&graph, &entries, &PublishOptions::message()).expect("apply");

        assert_eq!(next.metadata(&id("a")), Some(&Metadata::int(2)));
        assert_eq!(event.persistence, Persistence::Message);
    }

    #[test]
    fn failed_batch_leaves_graph_untouched() {
        let graph = seeded();
        let entries = vec![
            PublishEntry::identifier("a", Metadata::int(99)),
            PublishEntry::identifier("ghost", Metadata::int(1)),
        ];
        let err = MutationEngine::apply(&graph, &entries, &PublishOptions::message());

        assert!(err.is_err());
        assert_eq!(graph.metadata(&id("a")), Some(&Metadata::int(1)));
    }

    #[test]
    fn keep_retains_existing_metadata() {
        let graph = seeded();
        let entries = vec![PublishEntry::link("a", "b", MetadataUpdate::Keep)];
        let (next, event) =
            MutationEngine::apply(&graph, &entries, &PublishOptions::persistent()).expect("apply");

        assert_eq!(next.link_metadata(&key("a", "b")), Some(&Metadata::str("wire")));
        // Nothing actually changed, so nothing is reported.
        assert!(event.is_empty());
    }

    #[test]
    fn delete_cascades_and_is_reported() {
        let graph = seeded();
        let entries = vec![PublishEntry::identifier("a", MetadataUpdate::Delete)];
        let (next, event) =
            MutationEngine::apply(&graph, &entries, &PublishOptions::persistent()).expect("apply");

        assert!(!next.contains_identifier(&id("a")));
        assert!(!next.contains_link(&key("a", "b")));
        assert!(next.contains_identifier(&id("b")));
        assert!(event.changes.contains(&GraphChange::LinkDeleted(key("a", "b"))));
        assert!(event.changes.contains(&GraphChange::IdentifierDeleted(id("a"))));
    }

    #[test]
    fn message_publish_after_delete_reports_not_found() {
        let graph = seeded();
        let (deleted, _) = MutationEngine::apply(
            &graph,
            &[PublishEntry::identifier("a", MetadataUpdate::Delete)],
            &PublishOptions::persistent(),
        )
        .expect("delete");

        let err = MutationEngine::apply(
            &deleted,
            &[PublishEntry::identifier("a", MetadataUpdate::Keep)],
            &PublishOptions::message(),
        );
        assert!(matches!(err, Err(FilamentError::IdentifierNotFound(_))));
    }

    #[test]
    fn update_function_sees_current_value() {
        let graph = seeded();
        let double: MetadataFn = Arc::new(|old| match old {
            Metadata::Int(n) => Metadata::Int(n.saturating_mul(2)),
            other => other.clone(),
        });
        let entries = vec![PublishEntry::identifier("a", MetadataUpdate::Apply(double))];
        let (next, _) =
            MutationEngine::apply(&graph, &entries, &PublishOptions::persistent()).expect("apply");

        assert_eq!(next.metadata(&id("a")), Some(&Metadata::int(2)));
    }

    #[test]
    fn update_function_sees_null_for_created_identifier() {
        let witness: MetadataFn = Arc::new(|old| Metadata::Bool(old.is_null()));
        let entries = vec![PublishEntry::identifier("new", MetadataUpdate::Apply(witness))];
        let (next, _) =
            MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent())
                .expect("apply");

        assert_eq!(next.metadata(&id("new")), Some(&Metadata::Bool(true)));
    }

    #[test]
    fn endpoint_metadata_pairs_are_applied() {
        let entries = vec![PublishEntry::link_with(
            Endpoint::with("a", Metadata::str("left")),
            Endpoint::bare("b"),
            Metadata::str("wire"),
        )];
        let (next, _) =
            MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent())
                .expect("apply");

        assert_eq!(next.metadata(&id("a")), Some(&Metadata::str("left")));
        assert_eq!(next.metadata(&id("b")), Some(&Metadata::Null));
        assert_eq!(next.link_metadata(&key("a", "b")), Some(&Metadata::str("wire")));
    }

    #[test]
    fn self_link_is_malformed() {
        let entries = vec![PublishEntry::link("a", "a", Metadata::Null)];
        let err = MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent());
        assert!(matches!(err, Err(FilamentError::MalformedEntry(_))));
    }

    #[test]
    fn empty_identifier_is_malformed() {
        let entries = vec![PublishEntry::identifier("", Metadata::Null)];
        let err = MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent());
        assert!(matches!(err, Err(FilamentError::MalformedEntry(_))));
    }

    #[test]
    fn oversized_batch_is_malformed() {
        let entry = PublishEntry::identifier("a", MetadataUpdate::Keep);
        let entries = vec![entry; MAX_BATCH_LENGTH + 1];
        let err = MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent());
        assert!(matches!(err, Err(FilamentError::MalformedEntry(_))));
    }

    #[test]
    fn affected_identifiers_include_link_endpoints() {
        let entries = vec![PublishEntry::link("a", "b", Metadata::Null)];
        let (_, event) =
            MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent())
                .expect("apply");

        let affected = event.affected_identifiers();
        assert!(affected.contains(&id("a")));
        assert!(affected.contains(&id("b")));
    }
}
