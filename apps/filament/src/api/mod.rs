//! # Filament HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `POST /publish` - Apply a publish batch
//! - `POST /search` - Run the collect-search from a start identifier
//! - `POST /subscribe` - Register a standing search (deliveries are logged)
//! - `POST /unsubscribe` - Remove a standing search (idempotent)
//! - `GET /status` - Graph and subscription counters
//! - `POST /export` - Export the graph snapshot in canonical format
//! - `GET /health` - Health check
//!
//! ## Security Configuration
//!
//! See [`crate::config::ServerConfig`]: CORS origins, global rate limit and
//! optional API-key authentication, from `filament.toml` or environment.

mod auth;
mod handlers;
mod middleware;
pub mod types;

// Re-exports for external use
pub use middleware::{GlobalRateLimiter, create_rate_limiter};
// Re-export handlers for integration tests (via `filament::api::*`)
#[allow(unused_imports)]
pub use handlers::{
    export_handler, health_handler, publish_handler, search_handler, status_handler,
    subscribe_handler, unsubscribe_handler,
};

use crate::config::ServerConfig;
use crate::service::{self, ServiceHandle};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use filament_core::{FilamentError, Store};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state: the handle to the coordinator task.
#[derive(Clone)]
pub struct AppState {
    /// Client of the single graph owner.
    pub handle: ServiceHandle,
}

impl AppState {
    /// Create new app state from a coordinator handle.
    #[must_use]
    pub fn new(handle: ServiceHandle) -> Self {
        Self { handle }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from configuration.
///
/// - `"*"`: allows all origins (development mode - use with caution!)
/// - unset: defaults to localhost only (restrictive default)
/// - otherwise: comma-separated list of allowed origins
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    match config.cors_origins.as_deref() {
        Some("*") => {
            // Explicit wildcard - warn about security implications
            tracing::warn!(
                "CORS: Allowing ALL origins (cors_origins = \"*\"). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            // Parse comma-separated origins
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            // No configuration - default to localhost only (restrictive)
            tracing::info!("CORS: no origins configured, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let localhost_origins = vec![
        "http://localhost:3000".parse::<HeaderValue>().ok(),
        "http://localhost:8080".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:3000".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:8080".parse::<HeaderValue>().ok(),
    ];
    let origins: Vec<HeaderValue> = localhost_origins.into_iter().flatten().collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit - bounds request size
/// 4. Rate Limiting - protects against DoS (if enabled)
/// 5. Authentication - validates API key (if configured)
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = build_cors_layer(config);

    // Check if rate limiting is enabled
    let rate_limit = config.rate_limit();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    // Check if authentication is enabled
    let api_key = config.api_key().map(|key| Arc::new(key.to_string()));
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "⚠️  API key authentication DISABLED - all endpoints are publicly accessible! \
             Set api_key (or FILAMENT_API_KEY) to enable authentication."
        );
    }

    // Build base router with routes
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/publish", post(handlers::publish_handler))
        .route("/search", post(handlers::search_handler))
        .route("/subscribe", post(handlers::subscribe_handler))
        .route("/unsubscribe", post(handlers::unsubscribe_handler))
        .route("/export", post(handlers::export_handler));

    // Apply authentication middleware (innermost - runs last on request)
    if let Some(key) = api_key {
        router = router.layer(axum_middleware::from_fn_with_state(
            key,
            auth::api_key_auth_middleware,
        ));
    }

    // Apply rate limiting middleware
    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    // Apply tracing, CORS and body limit (outermost layers)
    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server over a store.
pub async fn run_server(
    addr: &str,
    store: Store,
    config: &ServerConfig,
) -> Result<(), FilamentError> {
    let handle = service::spawn(store);
    let state = AppState::new(handle);
    let router = create_router(state, config);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| FilamentError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Filament HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| FilamentError::Io(format!("Server error: {}", e)))
}
