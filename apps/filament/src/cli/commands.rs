//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands. All
//! commands except `server` operate offline against the redb database
//! through the synchronous store facade.

use crate::api;
use crate::api::types::{PublishRequest, VisitedJson};
use crate::config::ServerConfig;
use crate::service::collect_visits;
use filament_core::{
    FilamentError, GraphChange, Identifier, LoopDetection, RedbStore, SearchOptions, Store,
    TraversalOrder, graph_from_bytes, graph_to_bytes,
    primitives::MAX_TRAVERSAL_DEPTH,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for publish batches (100 MB).
///
/// This prevents memory exhaustion from malicious or accidental large files.
const MAX_BATCH_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for import (500 MB).
///
/// Import files can be larger since they contain binary graph data.
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), FilamentError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| FilamentError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(FilamentError::Serialization(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate an input file path.
///
/// Canonicalizes the path to resolve symlinks and "..", ensures it exists
/// and is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, FilamentError> {
    let canonical = path.canonicalize().map_err(|e| {
        FilamentError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(FilamentError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Validate an output path: the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, FilamentError> {
    let parent = path.parent().unwrap_or(Path::new("."));

    let canonical_parent = parent.canonicalize().map_err(|e| {
        FilamentError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(FilamentError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| FilamentError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    db_path: &Path,
    host: &str,
    port: u16,
    config_path: &Path,
) -> Result<(), FilamentError> {
    let config = ServerConfig::load(Some(config_path))?;
    let store = Store::with_redb(db_path)?;

    println!("Filament Topology Graph Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Database: {}", db_path.display());
    println!();
    println!("Endpoints:");
    println!("  POST /publish     - Apply a publish batch");
    println!("  POST /search      - Run a collect-search");
    println!("  POST /subscribe   - Register a standing search");
    println!("  POST /unsubscribe - Remove a standing search");
    println!("  GET  /status      - Graph status");
    println!("  POST /export      - Export graph snapshot");
    println!("  GET  /health      - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, store, &config).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show graph status.
pub fn cmd_status(db_path: &Path, json_mode: bool) -> Result<(), FilamentError> {
    let store = Store::with_redb(db_path)?;

    if json_mode {
        let output = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "identifier_count": store.identifier_count(),
            "link_count": store.link_count(),
        });
        println!("{}", output);
    } else {
        println!("Database:    {}", db_path.display());
        println!("Identifiers: {}", store.identifier_count());
        println!("Links:       {}", store.link_count());
    }
    Ok(())
}

// =============================================================================
// PUBLISH COMMAND
// =============================================================================

/// Apply a publish batch from a JSON file.
pub fn cmd_publish(db_path: &Path, json_mode: bool, file: &Path) -> Result<(), FilamentError> {
    let file = validate_file_path(file)?;
    validate_file_size(&file, MAX_BATCH_FILE_SIZE)?;

    let raw = std::fs::read_to_string(&file)
        .map_err(|e| FilamentError::Io(format!("Cannot read '{}': {}", file.display(), e)))?;
    let request: PublishRequest = serde_json::from_str(&raw)
        .map_err(|e| FilamentError::Serialization(format!("Invalid batch file: {}", e)))?;
    let (entries, options) = request.to_batch()?;

    let mut store = Store::with_redb(db_path)?;
    let event = store.publish_and_notify(&entries, &options)?;

    if json_mode {
        let output = serde_json::json!({
            "success": true,
            "entries": entries.len(),
            "changes": event.changes.len(),
        });
        println!("{}", output);
    } else {
        println!(
            "Published {} entries ({} changes)",
            entries.len(),
            event.changes.len()
        );
    }
    Ok(())
}

// =============================================================================
// SEARCH COMMAND
// =============================================================================

fn parse_order(order: &str) -> Result<TraversalOrder, FilamentError> {
    match order {
        "breadth" => Ok(TraversalOrder::Breadth),
        "depth" => Ok(TraversalOrder::Depth),
        other => Err(FilamentError::MalformedEntry(format!(
            "unknown order '{}' (expected breadth or depth)",
            other
        ))),
    }
}

fn parse_loop_detection(mode: &str) -> Result<LoopDetection, FilamentError> {
    match mode {
        "none" => Ok(LoopDetection::None),
        "link" => Ok(LoopDetection::Link),
        "identifier" => Ok(LoopDetection::Identifier),
        other => Err(FilamentError::MalformedEntry(format!(
            "unknown loop detection '{}' (expected none, link or identifier)",
            other
        ))),
    }
}

/// Run the collect-search from a start identifier.
pub fn cmd_search(
    db_path: &Path,
    json_mode: bool,
    start: &str,
    depth: usize,
    order: &str,
    loop_detection: &str,
) -> Result<(), FilamentError> {
    if depth > MAX_TRAVERSAL_DEPTH {
        return Err(FilamentError::MalformedEntry(format!(
            "depth {} exceeds maximum {}",
            depth, MAX_TRAVERSAL_DEPTH
        )));
    }
    let options = SearchOptions {
        order: parse_order(order)?,
        max_depth: depth,
        loop_detection: parse_loop_detection(loop_detection)?,
    };

    let store = Store::with_redb(db_path)?;
    let visits = collect_visits(store.graph(), &Identifier::new(start), &options)?;

    if json_mode {
        let rows: Vec<VisitedJson> = visits.iter().map(VisitedJson::from).collect();
        println!(
            "{}",
            serde_json::to_string(&rows)
                .map_err(|e| FilamentError::Serialization(e.to_string()))?
        );
    } else {
        for visit in &visits {
            println!(
                "{:>3}  {}  {}",
                visit.distance,
                visit.identifier,
                crate::api::types::metadata_to_json(&visit.metadata)
            );
        }
        println!("{} identifiers visited", visits.len());
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

/// Export the graph snapshot to a file.
pub fn cmd_export(db_path: &Path, output: &Path) -> Result<(), FilamentError> {
    let store = Store::with_redb(db_path)?;
    let bytes = graph_to_bytes(store.graph())?;

    let output = validate_output_path(output)?;
    std::fs::write(&output, &bytes)
        .map_err(|e| FilamentError::Io(format!("Cannot write '{}': {}", output.display(), e)))?;

    println!(
        "Exported {} identifiers, {} links to {}",
        store.identifier_count(),
        store.link_count(),
        output.display()
    );
    Ok(())
}

/// Merge a canonical snapshot file into the database.
pub fn cmd_import(db_path: &Path, input: &Path) -> Result<(), FilamentError> {
    let input = validate_file_path(input)?;
    validate_file_size(&input, MAX_IMPORT_FILE_SIZE)?;

    let bytes = std::fs::read(&input)
        .map_err(|e| FilamentError::Io(format!("Cannot read '{}': {}", input.display(), e)))?;
    let graph = graph_from_bytes(&bytes)?;

    let mut changes: Vec<GraphChange> = graph
        .identifiers()
        .map(|(id, meta)| GraphChange::IdentifierSet(id.clone(), meta.clone()))
        .collect();
    changes.extend(
        graph
            .links()
            .map(|(key, meta)| GraphChange::LinkSet(key.clone(), meta.clone())),
    );

    let store = RedbStore::open(db_path)?;
    store.apply(&changes)?;

    println!(
        "Imported {} identifiers, {} links from {}",
        graph.identifier_count(),
        graph.link_count(),
        input.display()
    );
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new empty database.
pub fn cmd_init(db_path: &Path, force: bool) -> Result<(), FilamentError> {
    if db_path.exists() {
        if !force {
            return Err(FilamentError::Io(format!(
                "Database '{}' already exists (use --force to overwrite)",
                db_path.display()
            )));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| FilamentError::Io(format!("Cannot remove existing database: {}", e)))?;
    }

    let _ = RedbStore::open(db_path)?;
    println!("Initialized empty database at {}", db_path.display());
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
