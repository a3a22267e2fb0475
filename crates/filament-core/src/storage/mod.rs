//! # Durable Storage
//!
//! The redb-backed record store for persistent-class mutations.

mod redb_store;

pub use redb_store::RedbStore;
