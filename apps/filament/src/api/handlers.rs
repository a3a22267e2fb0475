//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.

use super::{
    AppState,
    types::{
        ExportResponse, HealthResponse, PublishRequest, PublishResponse, SearchRequest,
        SearchResponse, StatusResponse, SubscribeRequest, SubscribeResponse, UnsubscribeRequest,
        UnsubscribeResponse, metadata_to_json,
    },
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use filament_core::{
    FilamentError, Identifier, Metadata, StepControl, SubscriptionId, SubscriptionOptions,
    SubscriptionStepFn, graph_to_bytes,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Map a core error to the HTTP status it should surface as.
fn error_status(err: &FilamentError) -> StatusCode {
    match err {
        FilamentError::IdentifierNotFound(_) | FilamentError::LinkNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        FilamentError::MalformedEntry(_) => StatusCode::BAD_REQUEST,
        FilamentError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        FilamentError::Callback(_) | FilamentError::Serialization(_) | FilamentError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// STATUS HANDLER
// =============================================================================

/// Get graph status.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.handle.status().await {
        Ok(status) => (
            StatusCode::OK,
            Json(StatusResponse {
                identifier_count: status.identifier_count,
                link_count: status.link_count,
                subscription_count: status.subscription_count,
                persistent: status.persistent,
            }),
        )
            .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(PublishResponse::error(format!("Status failed: {}", err))),
        )
            .into_response(),
    }
}

// =============================================================================
// PUBLISH HANDLER
// =============================================================================

/// Apply a publish batch.
pub async fn publish_handler(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> impl IntoResponse {
    let (entries, options) = match request.to_batch() {
        Ok(batch) => batch,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(PublishResponse::error(format!("Invalid batch: {}", err))),
            );
        }
    };

    match state.handle.publish(entries, options).await {
        Ok(()) => (StatusCode::OK, Json(PublishResponse::ok())),
        Err(err) => (
            error_status(&err),
            Json(PublishResponse::error(format!("Publish failed: {}", err))),
        ),
    }
}

// =============================================================================
// SEARCH HANDLER
// =============================================================================

/// Run the canned collect-search against a fresh snapshot.
pub async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> impl IntoResponse {
    let options = match request.to_options() {
        Ok(options) => options,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(SearchResponse::error(format!("Invalid search: {}", err))),
            );
        }
    };

    let start = Identifier::new(request.start.as_str());
    match state.handle.collect_search(start, options).await {
        Ok(visits) => (StatusCode::OK, Json(SearchResponse::with_visits(&visits))),
        Err(err) => (
            error_status(&err),
            Json(SearchResponse::error(format!("Search failed: {}", err))),
        ),
    }
}

// =============================================================================
// SUBSCRIBE / UNSUBSCRIBE HANDLERS
// =============================================================================

/// The standing search registered over HTTP: collect visited identifier
/// metadata into a map keyed by identifier.
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

/// Register a standing search; deliveries are logged per subscription.
pub async fn subscribe_handler(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> impl IntoResponse {
    let search = match request.to_search_options() {
        Ok(options) => options,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(SubscribeResponse::error(format!(
                    "Invalid subscription: {}",
                    err
                ))),
            );
        }
    };

    let start = Identifier::new(request.start.as_str());
    let delivery_start = start.clone();
    let options = SubscriptionOptions {
        search,
        trigger: request.to_trigger(),
        delta_fn: None,
        delivery_fn: Some(Arc::new(move |delta: &Metadata| {
            tracing::info!(
                start = %delivery_start,
                delta = %metadata_to_json(delta),
                "subscription delta"
            );
            Ok(filament_core::DeliveryControl::Continue)
        })),
    };

    match state
        .handle
        .subscribe(collect_step(), Metadata::Null, start, options)
        .await
    {
        Ok(id) => (StatusCode::OK, Json(SubscribeResponse::success(id))),
        Err(err) => (
            error_status(&err),
            Json(SubscribeResponse::error(format!("Subscribe failed: {}", err))),
        ),
    }
}

/// Remove a standing search. Unknown ids succeed.
pub async fn unsubscribe_handler(
    State(state): State<AppState>,
    Json(request): Json<UnsubscribeRequest>,
) -> impl IntoResponse {
    match state
        .handle
        .unsubscribe(SubscriptionId(request.subscription_id))
        .await
    {
        Ok(()) => (StatusCode::OK, Json(UnsubscribeResponse { success: true })),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(UnsubscribeResponse { success: false }),
        ),
    }
}

// =============================================================================
// EXPORT HANDLER
// =============================================================================

/// Export the current graph snapshot in canonical format.
pub async fn export_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = match state.handle.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ExportResponse::error(format!("Snapshot failed: {}", err))),
            );
        }
    };

    match graph_to_bytes(&snapshot) {
        Ok(bytes) => (StatusCode::OK, Json(ExportResponse::success(&bytes))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ExportResponse::error(format!("Export failed: {}", err))),
        ),
    }
}
