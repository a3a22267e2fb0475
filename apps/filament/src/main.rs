//! # Filament - Topology Graph Server
//!
//! The main binary for the Filament identifier/link graph store.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for offline graph operations
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                    apps/filament (THE BINARY)                  │
//! │                                                                │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐  │
//! │  │   CLI       │    │   HTTP API  │    │  Coordinator     │  │
//! │  │  (clap)     │    │   (axum)    │    │  (owns the store)│  │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘  │
//! │         │                  └────────────────────┘             │
//! │         │                            ▼                        │
//! │         │                   ┌─────────────────┐               │
//! │         └──────────────────▶│  filament-core  │               │
//! │                             │  (THE LOGIC)    │               │
//! │                             └─────────────────┘               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! filament server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! filament status
//! filament publish -f batch.json
//! filament search -s switch-1 -d 2
//! ```

use clap::Parser;
use filament::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing — FILAMENT_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("FILAMENT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "filament=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Display startup banner
    if !cli.quiet {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Filament startup banner.
fn print_banner() {
    println!(
        r#"
  ███████╗██╗██╗      █████╗ ███╗   ███╗███████╗███╗   ██╗████████╗
  ██╔════╝██║██║     ██╔══██╗████╗ ████║██╔════╝████╗  ██║╚══██╔══╝
  █████╗  ██║██║     ███████║██╔████╔██║█████╗  ██╔██╗ ██║   ██║
  ██╔══╝  ██║██║     ██╔══██║██║╚██╔╝██║██╔══╝  ██║╚██╗██║   ██║
  ██║     ██║███████╗██║  ██║██║ ╚═╝ ██║███████╗██║ ╚████║   ██║
  ╚═╝     ╚═╝╚══════╝╚═╝  ╚═╝╚═╝     ╚═╝╚══════╝╚═╝  ╚═══╝   ╚═╝

  Topology Graph Server v{}

  Publish • Search • Subscribe
"#,
        env!("CARGO_PKG_VERSION")
    );
}
