//! # redb-backed Record Store
//!
//! Durable mirror of the persistent-class graph view using the redb embedded
//! database:
//! - ACID transactions: one write transaction per committed publish batch
//! - Crash safety (copy-on-write B-trees)
//! - Zero configuration
//!
//! The in-memory graph stays authoritative at runtime; this store records
//! committed persistent changes and rebuilds the graph on open. Message-class
//! mutations never reach it.

use crate::graph::Graph;
use crate::mutation::GraphChange;
use crate::{FilamentError, Identifier, LinkKey, Metadata};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Table for identifiers: identifier string -> postcard-encoded Metadata.
const IDENTIFIERS: TableDefinition<&str, &[u8]> = TableDefinition::new("identifiers");

/// Table for links: normalized (a, b) endpoint pair -> postcard Metadata.
const LINKS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("links");

/// A durable identifier/link record store.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

fn io_err(e: impl std::fmt::Display) -> FilamentError {
    FilamentError::Io(e.to_string())
}

fn encode(metadata: &Metadata) -> Result<Vec<u8>, FilamentError> {
    postcard::to_allocvec(metadata).map_err(|e| FilamentError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Metadata, FilamentError> {
    postcard::from_bytes(bytes).map_err(|e| FilamentError::Serialization(e.to_string()))
}

impl RedbStore {
    /// Open or create a record store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FilamentError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(IDENTIFIERS).map_err(io_err)?;
            let _ = write_txn.open_table(LINKS).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db })
    }

    /// Apply one committed batch's changes in a single write transaction.
    pub fn apply(&self, changes: &[GraphChange]) -> Result<(), FilamentError> {
        if changes.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut identifiers = write_txn.open_table(IDENTIFIERS).map_err(io_err)?;
            let mut links = write_txn.open_table(LINKS).map_err(io_err)?;

            for change in changes {
                match change {
                    GraphChange::IdentifierSet(id, metadata) => {
                        let bytes = encode(metadata)?;
                        identifiers
                            .insert(id.as_str(), bytes.as_slice())
                            .map_err(io_err)?;
                    }
                    GraphChange::IdentifierDeleted(id) => {
                        identifiers.remove(id.as_str()).map_err(io_err)?;
                    }
                    GraphChange::LinkSet(key, metadata) => {
                        let bytes = encode(metadata)?;
                        let (a, b) = key.endpoints();
                        links
                            .insert((a.as_str(), b.as_str()), bytes.as_slice())
                            .map_err(io_err)?;
                    }
                    GraphChange::LinkDeleted(key) => {
                        let (a, b) = key.endpoints();
                        links.remove((a.as_str(), b.as_str())).map_err(io_err)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(io_err)
    }

    /// Rebuild the persistent graph view.
    pub fn load(&self) -> Result<Graph, FilamentError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let mut graph = Graph::new();

        {
            let table = read_txn.open_table(IDENTIFIERS).map_err(io_err)?;
            for entry in table.iter().map_err(io_err)? {
                let (key, value) = entry.map_err(io_err)?;
                graph.insert_identifier(Identifier::new(key.value()), decode(value.value())?);
            }
        }

        {
            let table = read_txn.open_table(LINKS).map_err(io_err)?;
            for entry in table.iter().map_err(io_err)? {
                let (key, value) = entry.map_err(io_err)?;
                let (a, b) = key.value();
                let metadata = decode(value.value())?;
                // Rows referencing unknown endpoints would have to come from
                // an external writer; treat them as corruption.
                let link_key = LinkKey::new(Identifier::new(a), Identifier::new(b))
                    .ok_or_else(|| FilamentError::Serialization(format!(
                        "self-link record '{a}'"
                    )))?;
                graph.insert_link(link_key, metadata)?;
            }
        }

        Ok(graph)
    }

    /// Compact the database (optional optimization).
    pub fn compact(&mut self) -> Result<(), FilamentError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
