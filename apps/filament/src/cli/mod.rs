//! # Filament CLI Module
//!
//! This module implements the CLI interface for Filament.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show graph status
//! - `publish` - Apply a publish batch from a file
//! - `search` - Run the collect-search from a start identifier
//! - `export` - Export graph snapshot to file
//! - `import` - Merge a snapshot file into the database
//! - `init` - Initialize new database

mod commands;

use clap::{Parser, Subcommand};
use filament_core::FilamentError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Filament - Topology Graph Server
///
/// An in-memory identifier/link graph with transactional publish, loop-safe
/// search, and standing subscriptions.
#[derive(Parser, Debug)]
#[command(name = "filament")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the graph database
    #[arg(short = 'D', long, global = true, default_value = "filament.redb")]
    pub database: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Path to the TOML configuration file
        #[arg(short, long, default_value = "filament.toml")]
        config: PathBuf,
    },

    /// Show graph status
    Status,

    /// Apply a publish batch from a JSON file
    Publish {
        /// Path to the batch file (same JSON shape as POST /publish)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Run the collect-search from a start identifier
    Search {
        /// Start identifier
        #[arg(short, long)]
        start: String,

        /// Traversal depth beyond the start
        #[arg(short, long, default_value = "1")]
        depth: usize,

        /// Navigation order (breadth, depth)
        #[arg(short, long, default_value = "breadth")]
        order: String,

        /// Loop detection (none, link, identifier)
        #[arg(short, long, default_value = "identifier")]
        loop_detection: String,
    },

    /// Export graph snapshot in canonical format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Merge a canonical snapshot file into the database
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), FilamentError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port, config }) => {
            cmd_server(&cli.database, &host, port, &config).await
        }
        Some(Commands::Status) => cmd_status(&cli.database, json_mode),
        Some(Commands::Publish { file }) => cmd_publish(&cli.database, json_mode, &file),
        Some(Commands::Search {
            start,
            depth,
            order,
            loop_detection,
        }) => cmd_search(&cli.database, json_mode, &start, depth, &order, &loop_detection),
        Some(Commands::Export { output }) => cmd_export(&cli.database, &output),
        Some(Commands::Import { input }) => cmd_import(&cli.database, &input),
        Some(Commands::Init { force }) => cmd_init(&cli.database, force),
        None => {
            // No subcommand - show status by default
            cmd_status(&cli.database, json_mode)
        }
    }
}
