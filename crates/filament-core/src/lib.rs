//! # filament-core
//!
//! The deterministic graph store for Filament - THE LOGIC.
//!
//! This crate implements an in-memory graph of identifiers and links, both
//! carrying arbitrary structured metadata, with three operations layered on
//! top:
//! - **publish** — transactional batch mutation with metadata merge semantics
//! - **search** — a configurable, loop-safe fold over reachable identifiers
//! - **subscribe** — standing searches re-evaluated on relevant mutations,
//!   delivering only genuine deltas
//!
//! ## Architectural Constraints
//!
//! The CORE:
//! - Is the ONLY place where graph state exists (stateful)
//! - Has NO async, NO network dependencies (pure Rust)
//! - Uses `BTreeMap`/`BTreeSet` exclusively for deterministic ordering
//! - Serializes every mutation through the batch engine; readers consume
//!   snapshots and are never blocked by writers

// =============================================================================
// MODULES
// =============================================================================

pub mod formats;
pub mod graph;
pub mod mutation;
pub mod primitives;
pub mod storage;
pub mod store;
pub mod subscription;
pub mod traverse;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    FilamentError, Identifier, LinkKey, Metadata, MetadataFn, MetadataUpdate, Persistence,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use graph::{Graph, SerializableGraph};
pub use mutation::{
    Endpoint, GraphChange, MetadataUpdateArg, MutationEngine, MutationEvent, PublishEntry,
    PublishOptions,
};
pub use traverse::{
    LoopDetection, PathNode, SearchOptions, StepContext, StepControl, TraversalOrder, search,
};

// =============================================================================
// RE-EXPORTS: Subscriptions & Facade
// =============================================================================

pub use store::Store;
pub use subscription::{
    DeliveryControl, DeliveryFn, DeltaDecision, DeltaFn, EvalOutcome, Subscription,
    SubscriptionId, SubscriptionManager, SubscriptionOptions, SubscriptionStepFn, Trigger,
};

// =============================================================================
// RE-EXPORTS: Storage & Formats
// =============================================================================

pub use formats::{graph_from_bytes, graph_to_bytes};
pub use storage::RedbStore;
