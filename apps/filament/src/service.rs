//! # Coordinator Service
//!
//! The single logical owner of the graph store.
//!
//! One coordinator task exclusively owns the [`Store`]; every call reaches it
//! as a [`Command`] over an mpsc channel and returns through a oneshot reply.
//! This is the serialization point: at most one publish batch is validated or
//! applied at any instant, and the mutation history is linearizable.
//!
//! Searches never enter the coordinator. Callers fetch a snapshot and fold
//! over it in their own task, so a long search neither blocks mutation nor
//! observes one mid-traversal.
//!
//! Each subscription runs on its own worker task, fed `(snapshot, event)`
//! pairs in commit order over an unbounded channel. Publish replies as soon
//! as the mutation is committed; dispatch to workers happens after the reply
//! and a blocking callback stalls only its own subscription. Unsubscribing
//! removes the worker's sender and raises a cancellation flag checked before
//! each queued event, so it takes effect no later than the next event.

use filament_core::{
    EvalOutcome, FilamentError, Graph, Identifier, Metadata, MutationEvent, PublishEntry,
    PublishOptions, SearchOptions, StepControl, Store, Subscription, SubscriptionId,
    SubscriptionOptions, SubscriptionStepFn, search,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

// =============================================================================
// COMMANDS
// =============================================================================

/// Requests understood by the coordinator.
pub enum Command {
    Publish {
        entries: Vec<PublishEntry>,
        options: PublishOptions,
        reply: oneshot::Sender<Result<(), FilamentError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Graph>,
    },
    Subscribe {
        step: SubscriptionStepFn,
        initial: Metadata,
        start: Identifier,
        options: SubscriptionOptions,
        reply: oneshot::Sender<Result<SubscriptionId, FilamentError>>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
}

/// Point-in-time service statistics.
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub identifier_count: usize,
    pub link_count: usize,
    pub subscription_count: usize,
    pub persistent: bool,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable client of the coordinator.
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<Command>,
}

impl ServiceHandle {
    async fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, FilamentError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| FilamentError::Unavailable)?;
        rx.await.map_err(|_| FilamentError::Unavailable)
    }

    /// Apply a publish batch. Returns once the mutation is committed;
    /// subscription dispatch happens afterwards.
    pub async fn publish(
        &self,
        entries: Vec<PublishEntry>,
        options: PublishOptions,
    ) -> Result<(), FilamentError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Publish {
                entries,
                options,
                reply,
            },
            rx,
        )
        .await?
    }

    /// A consistent snapshot of the current graph.
    pub async fn snapshot(&self) -> Result<Graph, FilamentError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Snapshot { reply }, rx).await
    }

    /// Run a collect-search against a fresh snapshot, outside the
    /// coordinator.
    pub async fn collect_search(
        &self,
        start: Identifier,
        options: SearchOptions,
    ) -> Result<Vec<VisitedIdentifier>, FilamentError> {
        let snapshot = self.snapshot().await?;
        collect_visits(&snapshot, &start, &options)
    }

    /// Register a standing search.
    pub async fn subscribe(
        &self,
        step: SubscriptionStepFn,
        initial: Metadata,
        start: Identifier,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionId, FilamentError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Subscribe {
                step,
                initial,
                start,
                options,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Remove a standing search. Unknown ids succeed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), FilamentError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Unsubscribe { id, reply }, rx).await
    }

    /// Service statistics.
    pub async fn status(&self) -> Result<StatusSnapshot, FilamentError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Status { reply }, rx).await
    }
}

// =============================================================================
// CANNED COLLECT SEARCH
// =============================================================================

/// One row of a collect-search result.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitedIdentifier {
    pub identifier: Identifier,
    pub metadata: Metadata,
    /// Hops from the start identifier along the discovery path.
    pub distance: usize,
}

/// The canned search offered over HTTP and CLI: gather every visited
/// identifier with its metadata and discovery distance.
pub fn collect_visits(
    graph: &Graph,
    start: &Identifier,
    options: &SearchOptions,
) -> Result<Vec<VisitedIdentifier>, FilamentError> {
    search(
        graph,
        |ctx, mut acc: Vec<VisitedIdentifier>| {
            acc.push(VisitedIdentifier {
                identifier: ctx.identifier.clone(),
                metadata: ctx.metadata.clone(),
                distance: ctx.path.len(),
            });
            Ok((StepControl::Continue, acc))
        },
        Vec::new(),
        start,
        options,
    )
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Per-subscription worker bookkeeping held by the coordinator.
struct SubscriptionWorker {
    events: mpsc::UnboundedSender<(Arc<Graph>, Arc<MutationEvent>)>,
    cancel: watch::Sender<bool>,
}

/// Spawn the coordinator task over a store.
pub fn spawn(store: Store) -> ServiceHandle {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run(store, rx));
    ServiceHandle { tx }
}

async fn run(mut store: Store, mut rx: mpsc::Receiver<Command>) {
    let mut workers: BTreeMap<SubscriptionId, SubscriptionWorker> = BTreeMap::new();
    let mut next_subscription: u64 = 0;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Publish {
                entries,
                options,
                reply,
            } => match store.publish(&entries, &options) {
                Ok(event) => {
                    // Committed: acknowledge first, dispatch after.
                    let _ = reply.send(Ok(()));
                    if !event.is_empty() && !workers.is_empty() {
                        let snapshot = Arc::new(store.snapshot());
                        let event = Arc::new(event);
                        workers.retain(|id, worker| {
                            let alive = worker
                                .events
                                .send((Arc::clone(&snapshot), Arc::clone(&event)))
                                .is_ok();
                            if !alive {
                                tracing::debug!(subscription = %id, "worker gone, pruning");
                            }
                            alive
                        });
                    }
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },

            Command::Snapshot { reply } => {
                let _ = reply.send(store.snapshot());
            }

            Command::Subscribe {
                step,
                initial,
                start,
                options,
                reply,
            } => {
                let id = SubscriptionId(next_subscription);
                match Subscription::new(id, store.graph(), step, initial, start, options) {
                    Ok(subscription) => {
                        next_subscription = next_subscription.saturating_add(1);
                        let (events, events_rx) = mpsc::unbounded_channel();
                        let (cancel, cancel_rx) = watch::channel(false);
                        tokio::spawn(subscription_worker(subscription, events_rx, cancel_rx));
                        workers.insert(id, SubscriptionWorker { events, cancel });
                        tracing::info!(subscription = %id, "subscription registered");
                        let _ = reply.send(Ok(id));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }

            Command::Unsubscribe { id, reply } => {
                if let Some(worker) = workers.remove(&id) {
                    let _ = worker.cancel.send(true);
                    tracing::info!(subscription = %id, "subscription removed");
                }
                let _ = reply.send(());
            }

            Command::Status { reply } => {
                let _ = reply.send(StatusSnapshot {
                    identifier_count: store.identifier_count(),
                    link_count: store.link_count(),
                    subscription_count: workers.len(),
                    persistent: store.is_persistent(),
                });
            }
        }
    }
}

/// Drains one subscription's event queue in commit order.
async fn subscription_worker(
    mut subscription: Subscription,
    mut events: mpsc::UnboundedReceiver<(Arc<Graph>, Arc<MutationEvent>)>,
    cancel: watch::Receiver<bool>,
) {
    let id = subscription.id();
    while let Some((graph, event)) = events.recv().await {
        // Unsubscribe acknowledged: queued events must not deliver.
        if *cancel.borrow() {
            break;
        }
        if subscription.evaluate(&graph, &event) == EvalOutcome::Stopped {
            tracing::info!(subscription = %id, "subscription stopped itself");
            break;
        }
    }
    tracing::debug!(subscription = %id, "worker exiting");
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use filament_core::DeliveryControl;
    use std::collections::BTreeMap as Map;
    use std::time::Duration;
    use tokio::time::timeout;

    fn id(s: &str) -> Identifier {
        Identifier::new(s)
    }

    fn collect_step() -> SubscriptionStepFn {
        Arc::new(|ctx, acc| {
            let mut map = match acc {
                Metadata::Map(map) => map,
                _ => Map::new(),
            };
            map.insert(ctx.identifier.as_str().to_string(), ctx.metadata.clone());
            Ok((StepControl::Continue, Metadata::Map(map)))
        })
    }

    async fn recv_delta(
        rx: &mut mpsc::UnboundedReceiver<Metadata>,
    ) -> Metadata {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("delivery within deadline")
            .expect("channel open")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publish_then_search_through_service() {
        let handle = spawn(Store::new());
        handle
            .publish(
                vec![
                    PublishEntry::identifier("a", Metadata::int(1)),
                    PublishEntry::link("a", "b", Metadata::Null),
                ],
                PublishOptions::persistent(),
            )
            .await
            .expect("publish");

        let visits = handle
            .collect_search(id("a"), SearchOptions::depth(1))
            .await
            .expect("search");
        let names: Vec<&str> = visits.iter().map(|v| v.identifier.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(visits[1].distance, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deliveries_preserve_commit_order() {
        let handle = spawn(Store::new());
        handle
            .publish(
                vec![PublishEntry::identifier("a", Metadata::int(0))],
                PublishOptions::persistent(),
            )
            .await
            .expect("seed");

        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
        let mut options = SubscriptionOptions::default();
        options.delivery_fn = Some(Arc::new(move |delta: &Metadata| {
            let _ = delta_tx.send(delta.clone());
            Ok(DeliveryControl::Continue)
        }));

        let step: SubscriptionStepFn =
            Arc::new(|ctx, _| Ok((StepControl::Continue, ctx.metadata.clone())));
        handle
            .subscribe(step, Metadata::Null, id("a"), options)
            .await
            .expect("subscribe");

        for value in 1..=5 {
            handle
                .publish(
                    vec![PublishEntry::identifier("a", Metadata::int(value))],
                    PublishOptions::persistent(),
                )
                .await
                .expect("publish");
        }

        for value in 1..=5 {
            assert_eq!(recv_delta(&mut delta_rx).await, Metadata::int(value));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsubscribe_stops_deliveries() {
        let handle = spawn(Store::new());
        handle
            .publish(
                vec![PublishEntry::identifier("a", Metadata::int(0))],
                PublishOptions::persistent(),
            )
            .await
            .expect("seed");

        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
        let mut options = SubscriptionOptions::default();
        options.delivery_fn = Some(Arc::new(move |delta: &Metadata| {
            let _ = delta_tx.send(delta.clone());
            Ok(DeliveryControl::Continue)
        }));

        let sub = handle
            .subscribe(collect_step(), Metadata::Null, id("a"), options)
            .await
            .expect("subscribe");

        handle.unsubscribe(sub).await.expect("unsubscribe");
        handle.unsubscribe(sub).await.expect("idempotent");

        handle
            .publish(
                vec![PublishEntry::identifier("a", Metadata::int(9))],
                PublishOptions::persistent(),
            )
            .await
            .expect("publish");

        // The sender side is dropped with the worker; recv drains to None
        // without ever yielding a delivery.
        let outcome = timeout(Duration::from_secs(5), delta_rx.recv())
            .await
            .expect("worker should shut down");
        assert_eq!(outcome, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribe_missing_start_fails() {
        let handle = spawn(Store::new());
        let err = handle
            .subscribe(
                collect_step(),
                Metadata::Null,
                id("ghost"),
                SubscriptionOptions::default(),
            )
            .await;
        assert!(matches!(err, Err(FilamentError::IdentifierNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_reports_counts() {
        let handle = spawn(Store::new());
        handle
            .publish(
                vec![PublishEntry::link("a", "b", Metadata::Null)],
                PublishOptions::persistent(),
            )
            .await
            .expect("publish");

        let status = handle.status().await.expect("status");
        assert_eq!(status.identifier_count, 2);
        assert_eq!(status.link_count, 1);
        assert_eq!(status.subscription_count, 0);
        assert!(!status.persistent);
    }
}
