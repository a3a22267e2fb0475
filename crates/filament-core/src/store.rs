//! # Store Facade
//!
//! Combines the graph, the subscription registry and the optional durable
//! backend behind the four boundary operations: publish, search, subscribe,
//! unsubscribe.
//!
//! The facade is synchronous: it is the single logical owner of the graph
//! wherever it is embedded. The app layer wraps it in a coordinator task and
//! adds asynchronous subscription dispatch on top.

use crate::graph::Graph;
use crate::mutation::{MutationEngine, MutationEvent, PublishEntry, PublishOptions};
use crate::storage::RedbStore;
use crate::subscription::{
    SubscriptionId, SubscriptionManager, SubscriptionOptions, SubscriptionStepFn,
};
use crate::traverse::{SearchOptions, StepContext, StepControl, search};
use crate::{FilamentError, Identifier, Metadata, Persistence};
use std::path::Path;

/// The Filament store.
#[derive(Debug, Default)]
pub struct Store {
    graph: Graph,
    subscriptions: SubscriptionManager,
    durable: Option<RedbStore>,
}

impl Store {
    /// Create an empty, purely in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store over an existing graph.
    #[must_use]
    pub fn with_graph(graph: Graph) -> Self {
        Self {
            graph,
            subscriptions: SubscriptionManager::new(),
            durable: None,
        }
    }

    /// Open (or create) a durable store and load the persistent view into
    /// memory. Message-class mutations will still stay memory-only.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, FilamentError> {
        let durable = RedbStore::open(path)?;
        let graph = durable.load()?;
        Ok(Self {
            graph,
            subscriptions: SubscriptionManager::new(),
            durable: Some(durable),
        })
    }

    /// Whether a durable backend is attached.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.durable.is_some()
    }

    /// Read access to the current graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// An owned point-in-time copy of the graph.
    #[must_use]
    pub fn snapshot(&self) -> Graph {
        self.graph.snapshot()
    }

    /// Number of identifiers.
    #[must_use]
    pub fn identifier_count(&self) -> usize {
        self.graph.identifier_count()
    }

    /// Number of links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.graph.link_count()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    // =========================================================================
    // PUBLISH
    // =========================================================================

    /// Validate and apply a publish batch.
    ///
    /// Persistent batches are committed to the durable backend (when one is
    /// attached) before the in-memory swap, so a storage failure leaves
    /// both views unchanged. Returns the mutation event for dispatch; no
    /// subscription is notified here.
    pub fn publish(
        &mut self,
        entries: &[PublishEntry],
        options: &PublishOptions,
    ) -> Result<MutationEvent, FilamentError> {
        let (next, event) = MutationEngine::apply(&self.graph, entries, options)?;
        if event.persistence == Persistence::Persistent {
            if let Some(durable) = &self.durable {
                durable.apply(&event.changes)?;
            }
        }
        self.graph = next;
        Ok(event)
    }

    /// Publish and synchronously re-evaluate all subscriptions.
    pub fn publish_and_notify(
        &mut self,
        entries: &[PublishEntry],
        options: &PublishOptions,
    ) -> Result<MutationEvent, FilamentError> {
        let event = self.publish(entries, options)?;
        self.notify(&event);
        Ok(event)
    }

    /// Re-evaluate subscriptions against an already committed event.
    pub fn notify(&mut self, event: &MutationEvent) {
        self.subscriptions.notify(&self.graph, event);
    }

    // =========================================================================
    // SEARCH
    // =========================================================================

    /// Fold over the identifiers reachable from `start`.
    pub fn search<A, F>(
        &self,
        step: F,
        initial: A,
        start: &Identifier,
        options: &SearchOptions,
    ) -> Result<A, FilamentError>
    where
        F: FnMut(&StepContext<'_>, A) -> Result<(StepControl, A), FilamentError>,
    {
        search(&self.graph, step, initial, start, options)
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Register a standing search.
    pub fn subscribe(
        &mut self,
        step: SubscriptionStepFn,
        initial: Metadata,
        start: Identifier,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionId, FilamentError> {
        self.subscriptions
            .subscribe(&self.graph, step, initial, start, options)
    }

    /// Remove a standing search. Unknown ids succeed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }
}

// =============================================================================
// TESTS
// =============================================================================
