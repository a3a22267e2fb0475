//! # API Request/Response Types
//!
//! JSON structures of the HTTP API, plus the conversion between wire JSON
//! and the core [`Metadata`] value. Metadata update *functions* are a
//! library-level feature; the wire protocol covers `set`/`keep`/`delete`.

use crate::service::VisitedIdentifier;
use filament_core::{
    FilamentError, LoopDetection, Metadata, MetadataUpdate, Persistence, PublishEntry,
    PublishOptions, SearchOptions, SubscriptionId, TraversalOrder, Trigger,
    primitives::{MAX_BATCH_LENGTH, MAX_IDENTIFIER_LENGTH, MAX_TRAVERSAL_DEPTH},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// METADATA <-> JSON CONVERSION
// =============================================================================

/// Convert a core metadata value to wire JSON.
#[must_use]
pub fn metadata_to_json(metadata: &Metadata) -> serde_json::Value {
    match metadata {
        Metadata::Null => serde_json::Value::Null,
        Metadata::Bool(b) => serde_json::Value::Bool(*b),
        Metadata::Int(i) => serde_json::Value::from(*i),
        Metadata::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Metadata::Str(s) => serde_json::Value::String(s.clone()),
        Metadata::Seq(items) => serde_json::Value::Array(items.iter().map(metadata_to_json).collect()),
        Metadata::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), metadata_to_json(value)))
                .collect(),
        ),
    }
}

/// Convert wire JSON to a core metadata value.
#[must_use]
pub fn metadata_from_json(value: &serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Null => Metadata::Null,
        serde_json::Value::Bool(b) => Metadata::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Metadata::Int)
            .or_else(|| n.as_f64().map(Metadata::Float))
            .unwrap_or(Metadata::Null),
        serde_json::Value::String(s) => Metadata::Str(s.clone()),
        serde_json::Value::Array(items) => {
            Metadata::Seq(items.iter().map(metadata_from_json).collect())
        }
        serde_json::Value::Object(map) => Metadata::Map(
            map.iter()
                .map(|(key, value)| (key.clone(), metadata_from_json(value)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Graph status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub identifier_count: usize,
    pub link_count: usize,
    pub subscription_count: usize,
    pub persistent: bool,
}

// =============================================================================
// PUBLISH REQUEST/RESPONSE
// =============================================================================

/// What to do with an entity's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MetadataPatch {
    /// Store this literal JSON value.
    Set { value: serde_json::Value },
    /// Leave existing metadata unchanged.
    Keep,
    /// Remove the entity.
    Delete,
}

impl MetadataPatch {
    fn to_update(&self) -> MetadataUpdate {
        match self {
            Self::Set { value } => MetadataUpdate::Set(metadata_from_json(value)),
            Self::Keep => MetadataUpdate::Keep,
            Self::Delete => MetadataUpdate::Delete,
        }
    }
}

/// One publish batch entry: exactly one of `identifier` or `link` must be
/// present. Omitted metadata means `keep`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataPatch>,
}

impl EntryJson {
    /// Convert to a core publish entry, validating shape at the boundary.
    pub fn to_entry(&self) -> Result<PublishEntry, FilamentError> {
        let update = self
            .metadata
            .as_ref()
            .map_or(MetadataUpdate::Keep, MetadataPatch::to_update);

        match (&self.identifier, &self.link) {
            (Some(identifier), None) => {
                validate_identifier_string(identifier)?;
                Ok(PublishEntry::identifier(identifier.as_str(), update))
            }
            (None, Some((a, b))) => {
                validate_identifier_string(a)?;
                validate_identifier_string(b)?;
                Ok(PublishEntry::link(a.as_str(), b.as_str(), update))
            }
            _ => Err(FilamentError::MalformedEntry(
                "entry must have exactly one of 'identifier' or 'link'".to_string(),
            )),
        }
    }
}

fn validate_identifier_string(identifier: &str) -> Result<(), FilamentError> {
    if identifier.is_empty() {
        return Err(FilamentError::MalformedEntry(
            "empty identifier".to_string(),
        ));
    }
    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(FilamentError::MalformedEntry(format!(
            "identifier length {} exceeds maximum {} bytes",
            identifier.len(),
            MAX_IDENTIFIER_LENGTH
        )));
    }
    Ok(())
}

/// Publish request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub entries: Vec<EntryJson>,
    #[serde(default)]
    pub persistence: Persistence,
}

impl PublishRequest {
    /// Convert to core entries + options, validating every entry.
    pub fn to_batch(&self) -> Result<(Vec<PublishEntry>, PublishOptions), FilamentError> {
        if self.entries.len() > MAX_BATCH_LENGTH {
            return Err(FilamentError::MalformedEntry(format!(
                "batch of {} entries exceeds maximum {}",
                self.entries.len(),
                MAX_BATCH_LENGTH
            )));
        }
        let entries = self
            .entries
            .iter()
            .map(EntryJson::to_entry)
            .collect::<Result<Vec<_>, _>>()?;
        let options = PublishOptions {
            persistence: self.persistence,
        };
        Ok((entries, options))
    }
}

/// Publish response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub success: bool,
    pub error: Option<String>,
}

impl PublishResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// SEARCH REQUEST/RESPONSE
// =============================================================================

/// Navigation order on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderJson {
    #[default]
    Breadth,
    Depth,
}

impl OrderJson {
    const fn to_core(self) -> TraversalOrder {
        match self {
            Self::Breadth => TraversalOrder::Breadth,
            Self::Depth => TraversalOrder::Depth,
        }
    }
}

/// Loop detection mode on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopDetectionJson {
    None,
    Link,
    #[default]
    Identifier,
}

impl LoopDetectionJson {
    const fn to_core(self) -> LoopDetection {
        match self {
            Self::None => LoopDetection::None,
            Self::Link => LoopDetection::Link,
            Self::Identifier => LoopDetection::Identifier,
        }
    }
}

/// Search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub start: String,
    #[serde(default)]
    pub max_depth: usize,
    #[serde(default)]
    pub order: OrderJson,
    #[serde(default)]
    pub loop_detection: LoopDetectionJson,
}

impl SearchRequest {
    /// Convert to core search options, bounding depth at the API boundary.
    pub fn to_options(&self) -> Result<SearchOptions, FilamentError> {
        validate_identifier_string(&self.start)?;
        if self.max_depth > MAX_TRAVERSAL_DEPTH {
            return Err(FilamentError::MalformedEntry(format!(
                "max_depth {} exceeds maximum {}",
                self.max_depth, MAX_TRAVERSAL_DEPTH
            )));
        }
        Ok(SearchOptions {
            order: self.order.to_core(),
            max_depth: self.max_depth,
            loop_detection: self.loop_detection.to_core(),
        })
    }
}

/// One visited identifier in a search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitedJson {
    pub identifier: String,
    pub metadata: serde_json::Value,
    pub distance: usize,
}

impl From<&VisitedIdentifier> for VisitedJson {
    fn from(visited: &VisitedIdentifier) -> Self {
        Self {
            identifier: visited.identifier.as_str().to_string(),
            metadata: metadata_to_json(&visited.metadata),
            distance: visited.distance,
        }
    }
}

/// Search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub identifiers: Vec<VisitedJson>,
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn with_visits(visits: &[VisitedIdentifier]) -> Self {
        Self {
            success: true,
            identifiers: visits.iter().map(VisitedJson::from).collect(),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            identifiers: vec![],
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// SUBSCRIBE/UNSUBSCRIBE REQUEST/RESPONSE
// =============================================================================

/// Trigger class selection on the wire. Omitted fields default to true.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TriggerJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<bool>,
}

impl TriggerJson {
    fn to_core(self) -> Trigger {
        Trigger {
            persistent: self.persistent.unwrap_or(true),
            message: self.message.unwrap_or(true),
        }
    }
}

/// Subscribe request: the canned collect-search plus reactive options.
/// Deliveries are logged per subscription (the full delta pipeline with
/// caller-supplied functions is a library-level feature).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub start: String,
    #[serde(default)]
    pub max_depth: usize,
    #[serde(default)]
    pub order: OrderJson,
    #[serde(default)]
    pub loop_detection: LoopDetectionJson,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerJson>,
}

impl SubscribeRequest {
    /// Core search options of the standing search.
    pub fn to_search_options(&self) -> Result<SearchOptions, FilamentError> {
        SearchRequest {
            start: self.start.clone(),
            max_depth: self.max_depth,
            order: self.order,
            loop_detection: self.loop_detection,
        }
        .to_options()
    }

    /// Core trigger class selection.
    #[must_use]
    pub fn to_trigger(&self) -> Trigger {
        self.trigger.map_or_else(Trigger::default, TriggerJson::to_core)
    }
}

/// Subscribe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub success: bool,
    pub subscription_id: Option<u64>,
    pub error: Option<String>,
}

impl SubscribeResponse {
    pub fn success(id: SubscriptionId) -> Self {
        Self {
            success: true,
            subscription_id: Some(id.0),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            subscription_id: None,
            error: Some(msg.into()),
        }
    }
}

/// Unsubscribe request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub subscription_id: u64,
}

/// Unsubscribe response. Unknown ids succeed (idempotent no-op).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeResponse {
    pub success: bool,
}

// =============================================================================
// EXPORT RESPONSE
// =============================================================================

/// Export response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub success: bool,
    pub data: Option<String>, // Base64 encoded snapshot bytes
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn success(data: &[u8]) -> Self {
        Self {
            success: true,
            data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                data,
            )),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
