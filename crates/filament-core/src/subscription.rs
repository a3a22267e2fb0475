//! # Subscription Manager
//!
//! Standing searches over the graph: each subscription re-runs its search
//! when a qualifying mutation lands, computes a delta against the previous
//! result, and hands genuine deltas to its delivery function.
//!
//! Relevance filtering is coarse by design: a subscription is re-evaluated
//! whenever a mutation touches any identifier its previous evaluation
//! visited. False positives cost a re-search; false negatives are not
//! possible because new reachability always passes through an already
//! visited identifier.

use crate::graph::Graph;
use crate::mutation::MutationEvent;
use crate::traverse::{SearchOptions, StepContext, StepControl, search};
use crate::{FilamentError, Identifier, Metadata, Persistence};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// ERROR LOGGING HELPER
// =============================================================================

/// Log a callback failure without dragging a logging framework into the
/// core crate. The app layer runs its own tracing; this structured stderr
/// line stays greppable either way.
fn log_warn(context: &str, err: &FilamentError) {
    eprintln!(
        "{{\"level\":\"warn\",\"target\":\"filament_core::subscription\",\"message\":\"{} failed: {}\"}}",
        context, err
    );
}

// =============================================================================
// SUBSCRIPTION TYPES
// =============================================================================

/// Unique handle of a standing subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Which mutation classes re-evaluate a subscription. Defaults to both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub persistent: bool,
    pub message: bool,
}

impl Default for Trigger {
    fn default() -> Self {
        Self {
            persistent: true,
            message: true,
        }
    }
}

impl Trigger {
    /// Trigger on persistent batches only.
    #[must_use]
    pub const fn persistent_only() -> Self {
        Self {
            persistent: true,
            message: false,
        }
    }

    /// Trigger on message batches only.
    #[must_use]
    pub const fn message_only() -> Self {
        Self {
            persistent: false,
            message: true,
        }
    }

    /// Check whether a mutation class triggers this subscription.
    #[must_use]
    pub const fn matches(&self, persistence: Persistence) -> bool {
        match persistence {
            Persistence::Persistent => self.persistent,
            Persistence::Message => self.message,
        }
    }
}

/// Verdict of a delta function.
pub enum DeltaDecision {
    /// Deliver this value.
    Delta(Metadata),
    /// Nothing worth delivering; the accumulator still advances.
    NoDelta,
    /// Delete the subscription without delivering.
    Stop,
}

/// Verdict of a delivery function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryControl {
    /// Keep the subscription alive.
    Continue,
    /// Delete the subscription after this delivery.
    Stop,
}

/// Step function of a standing search. Subscriptions fix the accumulator
/// type to [`Metadata`] so results can be stored and compared uniformly.
pub type SubscriptionStepFn =
    Arc<dyn Fn(&StepContext<'_>, Metadata) -> Result<(StepControl, Metadata), FilamentError> + Send + Sync>;

/// Computes the delta between the previous and the new accumulator.
/// Invoked only when the two differ.
pub type DeltaFn =
    Arc<dyn Fn(&Metadata, &Metadata) -> Result<DeltaDecision, FilamentError> + Send + Sync>;

/// Receives a computed delta.
pub type DeliveryFn = Arc<dyn Fn(&Metadata) -> Result<DeliveryControl, FilamentError> + Send + Sync>;

/// Options of a subscription: the search parameters plus the reactive knobs.
#[derive(Clone, Default)]
pub struct SubscriptionOptions {
    pub search: SearchOptions,
    pub trigger: Trigger,
    pub delta_fn: Option<DeltaFn>,
    pub delivery_fn: Option<DeliveryFn>,
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("search", &self.search)
            .field("trigger", &self.trigger)
            .field("delta_fn", &self.delta_fn.is_some())
            .field("delivery_fn", &self.delivery_fn.is_some())
            .finish()
    }
}

/// Outcome of evaluating one subscription against one mutation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutcome {
    /// Trigger class or coarse filter ruled the event out.
    Skipped,
    /// Re-search ran; the accumulator did not change.
    Unchanged,
    /// A callback failed; state left as it was so the next event retries.
    Errored,
    /// The accumulator advanced without a delivery.
    Updated,
    /// A delta was delivered.
    Delivered,
    /// The subscription asked to be deleted.
    Stopped,
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// One standing search with its reactive state.
pub struct Subscription {
    id: SubscriptionId,
    start: Identifier,
    step: SubscriptionStepFn,
    options: SubscriptionOptions,
    /// The accumulator every (re-)evaluation starts from, as given at
    /// subscribe time. Results never compound across evaluations.
    initial: Metadata,
    last_accumulator: Metadata,
    /// Identifiers visited by the most recent evaluation, start included.
    scope: BTreeSet<Identifier>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("scope_size", &self.scope.len())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Register a subscription: runs the initial search to seed the
    /// accumulator and the scope.
    pub fn new(
        id: SubscriptionId,
        graph: &Graph,
        step: SubscriptionStepFn,
        initial: Metadata,
        start: Identifier,
        options: SubscriptionOptions,
    ) -> Result<Self, FilamentError> {
        let (last_accumulator, scope) =
            run_scoped_search(graph, &step, initial.clone(), &start, &options.search)?;
        Ok(Self {
            id,
            start,
            step,
            options,
            initial,
            last_accumulator,
            scope,
        })
    }

    /// The subscription's handle.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The most recent search result.
    #[must_use]
    pub fn last_accumulator(&self) -> &Metadata {
        &self.last_accumulator
    }

    /// Coarse relevance test: trigger class plus scope intersection.
    #[must_use]
    pub fn is_triggered_by(&self, event: &MutationEvent) -> bool {
        if !self.options.trigger.matches(event.persistence) {
            return false;
        }
        event
            .affected_identifiers()
            .iter()
            .any(|identifier| self.scope.contains(identifier))
    }

    /// Re-evaluate against the post-mutation graph.
    pub fn evaluate(&mut self, graph: &Graph, event: &MutationEvent) -> EvalOutcome {
        if !self.is_triggered_by(event) {
            return EvalOutcome::Skipped;
        }

        let (new_accumulator, new_scope) = match run_scoped_search(
            graph,
            &self.step,
            self.initial.clone(),
            &self.start,
            &self.options.search,
        ) {
            Ok(result) => result,
            Err(err) => {
                // Includes the start identifier having been deleted. The
                // previous accumulator stays; a later event retries.
                log_warn("subscription re-search", &err);
                return EvalOutcome::Errored;
            }
        };
        self.scope = new_scope;

        if new_accumulator == self.last_accumulator {
            return EvalOutcome::Unchanged;
        }

        let delta = match &self.options.delta_fn {
            None => Some(new_accumulator.clone()),
            Some(delta_fn) => match delta_fn(&self.last_accumulator, &new_accumulator) {
                Err(err) => {
                    log_warn("delta function", &err);
                    return EvalOutcome::Errored;
                }
                Ok(DeltaDecision::Stop) => return EvalOutcome::Stopped,
                Ok(DeltaDecision::NoDelta) => None,
                Ok(DeltaDecision::Delta(value)) => Some(value),
            },
        };

        let mut delivered = false;
        if let (Some(value), Some(delivery_fn)) = (&delta, &self.options.delivery_fn) {
            match delivery_fn(value) {
                Err(err) => {
                    log_warn("delivery function", &err);
                    return EvalOutcome::Errored;
                }
                Ok(DeliveryControl::Stop) => {
                    self.last_accumulator = new_accumulator;
                    return EvalOutcome::Stopped;
                }
                Ok(DeliveryControl::Continue) => delivered = true,
            }
        }

        self.last_accumulator = new_accumulator;
        if delivered {
            EvalOutcome::Delivered
        } else {
            EvalOutcome::Updated
        }
    }
}

/// Run a search while recording every visited identifier.
fn run_scoped_search(
    graph: &Graph,
    step: &SubscriptionStepFn,
    initial: Metadata,
    start: &Identifier,
    options: &SearchOptions,
) -> Result<(Metadata, BTreeSet<Identifier>), FilamentError> {
    let mut scope = BTreeSet::new();
    scope.insert(start.clone());
    let step = Arc::clone(step);
    let accumulator = search(
        graph,
        |context, acc| {
            scope.insert(context.identifier.clone());
            step(context, acc)
        },
        initial,
        start,
        options,
    )?;
    Ok((accumulator, scope))
}

// =============================================================================
// SUBSCRIPTION MANAGER
// =============================================================================

/// Registry of standing subscriptions for synchronous (library) embedding.
///
/// The app layer runs each subscription on its own worker task instead; both
/// paths share [`Subscription::evaluate`].
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    next_id: u64,
}

impl SubscriptionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a standing search. Fails if the start identifier is missing.
    pub fn subscribe(
        &mut self,
        graph: &Graph,
        step: SubscriptionStepFn,
        initial: Metadata,
        start: Identifier,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionId, FilamentError> {
        let id = SubscriptionId(self.next_id);
        let subscription = Subscription::new(id, graph, step, initial, start, options)?;
        self.next_id = self.next_id.saturating_add(1);
        self.subscriptions.insert(id, subscription);
        Ok(id)
    }

    /// Remove a subscription. Unknown or already-removed ids succeed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.remove(&id);
    }

    /// Re-evaluate every subscription against a committed mutation.
    pub fn notify(&mut self, graph: &Graph, event: &MutationEvent) {
        let mut stopped = Vec::new();
        for (id, subscription) in &mut self.subscriptions {
            if subscription.evaluate(graph, event) == EvalOutcome::Stopped {
                stopped.push(*id);
            }
        }
        for id in stopped {
            self.subscriptions.remove(&id);
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no subscriptions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Check whether a subscription is still registered.
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// The most recent search result of a subscription.
    #[must_use]
    pub fn last_accumulator(&self, id: SubscriptionId) -> Option<&Metadata> {
        self.subscriptions.get(&id).map(Subscription::last_accumulator)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{MutationEngine, PublishEntry, PublishOptions};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(s: &str) -> Identifier {
        Identifier::new(s)
    }

    /// Step fn collecting visited identifier metadata into a map keyed by
    /// identifier, the canonical "what does my neighborhood look like" query.
    fn collect_step() -> SubscriptionStepFn {
        Arc::new(|ctx, acc| {
            let mut map = match acc {
                Metadata::Map(map) => map,
                _ => BTreeMap::new(),
            };
            map.insert(ctx.identifier.as_str().to_string(), ctx.metadata.clone());
            Ok((StepControl::Continue, Metadata::Map(map)))
        })
    }

    fn publish(graph: &mut Graph, entries: Vec<PublishEntry>, options: PublishOptions) -> MutationEvent {
        let (next, event) = MutationEngine::apply(graph, &entries, &options).expect("publish");
        *graph = next;
        event
    }

    fn seeded() -> Graph {
        let mut graph = Graph::new();
        publish(
            &mut graph,
            vec![
                PublishEntry::identifier("a", Metadata::int(1)),
                PublishEntry::link("a", "b", Metadata::Null),
            ],
            PublishOptions::persistent(),
        );
        graph
    }

    fn depth_one() -> SubscriptionOptions {
        SubscriptionOptions {
            search: SearchOptions::depth(1),
            ..SubscriptionOptions::default()
        }
    }

    #[test]
    fn subscribe_runs_initial_search() {
        let graph = seeded();
        let mut manager = SubscriptionManager::new();
        let sub = manager
            .subscribe(&graph, collect_step(), Metadata::Null, id("a"), depth_one())
            .expect("subscribe");

        let acc = manager.last_accumulator(sub).expect("acc");
        assert!(matches!(acc, Metadata::Map(map) if map.len() == 2));
    }

    #[test]
    fn subscribe_missing_start_fails() {
        let graph = Graph::new();
        let mut manager = SubscriptionManager::new();
        let err = manager.subscribe(&graph, collect_step(), Metadata::Null, id("ghost"), depth_one());
        assert!(matches!(err, Err(FilamentError::IdentifierNotFound(_))));
    }

    #[test]
    fn changed_result_delivers_new_accumulator_once() {
        let mut graph = seeded();
        let deliveries: Arc<Mutex<Vec<Metadata>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&deliveries);

        let mut manager = SubscriptionManager::new();
        let mut options = depth_one();
        options.delivery_fn = Some(Arc::new(move |delta| {
            sink.lock().map_err(|_| FilamentError::Callback("poisoned".into()))?.push(delta.clone());
            Ok(DeliveryControl::Continue)
        }));
        manager
            .subscribe(&graph, collect_step(), Metadata::Null, id("a"), options)
            .expect("subscribe");

        let event = publish(
            &mut graph,
            vec![PublishEntry::identifier("b", Metadata::int(7))],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);

        let delivered = deliveries.lock().expect("lock");
        assert_eq!(delivered.len(), 1);
        assert!(matches!(
            &delivered[0],
            Metadata::Map(map) if map.get("b") == Some(&Metadata::int(7))
        ));
    }

    #[test]
    fn unrelated_change_delivers_nothing() {
        let mut graph = seeded();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);

        let mut manager = SubscriptionManager::new();
        let mut options = depth_one();
        options.delivery_fn = Some(Arc::new(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryControl::Continue)
        }));
        manager
            .subscribe(&graph, collect_step(), Metadata::Null, id("a"), options)
            .expect("subscribe");

        // A disconnected island: not in the subscription's scope.
        let event = publish(
            &mut graph,
            vec![PublishEntry::identifier("far", Metadata::int(1))],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn trigger_class_filters_events() {
        let mut graph = seeded();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);

        let mut manager = SubscriptionManager::new();
        let mut options = depth_one();
        options.trigger = Trigger::persistent_only();
        options.delivery_fn = Some(Arc::new(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryControl::Continue)
        }));
        manager
            .subscribe(&graph, collect_step(), Metadata::Null, id("a"), options)
            .expect("subscribe");

        let event = publish(
            &mut graph,
            vec![PublishEntry::identifier("a", Metadata::int(5))],
            PublishOptions::message(),
        );
        manager.notify(&graph, &event);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let event = publish(
            &mut graph,
            vec![PublishEntry::identifier("a", Metadata::int(6))],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delta_fn_nodelta_skips_delivery_but_advances() {
        let mut graph = seeded();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);

        let mut manager = SubscriptionManager::new();
        let mut options = depth_one();
        options.delta_fn = Some(Arc::new(|_, _| Ok(DeltaDecision::NoDelta)));
        options.delivery_fn = Some(Arc::new(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryControl::Continue)
        }));
        let sub = manager
            .subscribe(&graph, collect_step(), Metadata::Null, id("a"), options)
            .expect("subscribe");

        let event = publish(
            &mut graph,
            vec![PublishEntry::identifier("a", Metadata::int(9))],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        // The accumulator advanced anyway, so replaying the same state
        // produces no further evaluation churn.
        let acc = manager.last_accumulator(sub).expect("acc");
        assert!(matches!(
            acc,
            Metadata::Map(map) if map.get("a") == Some(&Metadata::int(9))
        ));
    }

    #[test]
    fn delta_fn_stop_deletes_without_delivery() {
        let mut graph = seeded();
        let mut manager = SubscriptionManager::new();
        let mut options = depth_one();
        options.delta_fn = Some(Arc::new(|_, _| Ok(DeltaDecision::Stop)));
        let sub = manager
            .subscribe(&graph, collect_step(), Metadata::Null, id("a"), options)
            .expect("subscribe");

        let event = publish(
            &mut graph,
            vec![PublishEntry::identifier("a", Metadata::int(2))],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);

        assert!(!manager.contains(sub));
    }

    #[test]
    fn delivery_stop_deletes_after_delivery() {
        let mut graph = seeded();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);

        let mut manager = SubscriptionManager::new();
        let mut options = depth_one();
        options.delivery_fn = Some(Arc::new(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryControl::Stop)
        }));
        let sub = manager
            .subscribe(&graph, collect_step(), Metadata::Null, id("a"), options)
            .expect("subscribe");

        let event = publish(
            &mut graph,
            vec![PublishEntry::identifier("a", Metadata::int(2))],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!manager.contains(sub));
    }

    #[test]
    fn failing_step_leaves_accumulator_for_retry() {
        let mut graph = seeded();
        let fail_once = Arc::new(AtomicUsize::new(0));
        let gate = Arc::clone(&fail_once);
        let step: SubscriptionStepFn = Arc::new(move |ctx, _| {
            if gate.load(Ordering::SeqCst) == 1 {
                Err(FilamentError::Callback("flaky".to_string()))
            } else {
                Ok((StepControl::Continue, ctx.metadata.clone()))
            }
        });

        let mut manager = SubscriptionManager::new();
        let sub = manager
            .subscribe(&graph, step, Metadata::Null, id("a"), SubscriptionOptions::default())
            .expect("subscribe");
        assert_eq!(manager.last_accumulator(sub), Some(&Metadata::int(1)));

        // First event: the step function fails, state must survive.
        fail_once.store(1, Ordering::SeqCst);
        let event = publish(
            &mut graph,
            vec![PublishEntry::identifier("a", Metadata::int(2))],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);
        assert!(manager.contains(sub));
        assert_eq!(manager.last_accumulator(sub), Some(&Metadata::int(1)));

        // Second event: recovered, the retry catches up.
        fail_once.store(0, Ordering::SeqCst);
        let event = publish(
            &mut graph,
            vec![PublishEntry::identifier("a", Metadata::int(3))],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);
        assert_eq!(manager.last_accumulator(sub), Some(&Metadata::int(3)));
    }

    #[test]
    fn growing_reachability_is_not_missed() {
        // The coarse filter must catch a change that extends the result set
        // through an already visited frontier identifier.
        let mut graph = seeded();
        let mut manager = SubscriptionManager::new();
        let sub = manager
            .subscribe(
                &graph,
                collect_step(),
                Metadata::Null,
                id("a"),
                SubscriptionOptions {
                    search: SearchOptions::depth(2),
                    ..SubscriptionOptions::default()
                },
            )
            .expect("subscribe");

        // Link a new identifier to b: b is in scope, so this re-evaluates.
        let event = publish(
            &mut graph,
            vec![PublishEntry::link("b", "c", Metadata::Null)],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);

        let acc = manager.last_accumulator(sub).expect("acc");
        assert!(matches!(acc, Metadata::Map(map) if map.contains_key("c")));
    }

    #[test]
    fn shrinking_result_drops_stale_entries() {
        // Re-evaluation folds from the subscribe-time initial accumulator,
        // so entries that left the result set disappear from the map.
        let mut graph = seeded();
        let mut manager = SubscriptionManager::new();
        let sub = manager
            .subscribe(&graph, collect_step(), Metadata::Null, id("a"), depth_one())
            .expect("subscribe");
        assert!(matches!(
            manager.last_accumulator(sub).expect("acc"),
            Metadata::Map(map) if map.contains_key("b")
        ));

        let event = publish(
            &mut graph,
            vec![PublishEntry::link("a", "b", crate::MetadataUpdate::Delete)],
            PublishOptions::persistent(),
        );
        manager.notify(&graph, &event);

        let acc = manager.last_accumulator(sub).expect("acc");
        assert!(matches!(acc, Metadata::Map(map) if !map.contains_key("b")));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let graph = seeded();
        let mut manager = SubscriptionManager::new();
        let sub = manager
            .subscribe(&graph, collect_step(), Metadata::Null, id("a"), depth_one())
            .expect("subscribe");

        manager.unsubscribe(sub);
        manager.unsubscribe(sub);
        manager.unsubscribe(SubscriptionId(999));
        assert!(manager.is_empty());
    }
}
