//! # Server Configuration
//!
//! Layered configuration for the HTTP server: an optional `filament.toml`
//! file, overridden by environment variables.
//!
//! ## Environment Variables
//!
//! - `FILAMENT_CORS_ORIGINS`: Comma-separated allowed origins, or "*" for all
//! - `FILAMENT_RATE_LIMIT`: Requests per second (0 disables limiting)
//! - `FILAMENT_API_KEY`: If set, requires Bearer token authentication

use filament_core::FilamentError;
use serde::Deserialize;
use std::path::Path;

/// Default rate limit when nothing is configured.
const DEFAULT_RATE_LIMIT: u32 = 100;

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Comma-separated allowed CORS origins, "*" for all, unset for
    /// localhost only.
    pub cors_origins: Option<String>,
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit: Option<u32>,
    /// Bearer token required on every endpoint except /health.
    pub api_key: Option<String>,
}

impl ServerConfig {
    /// Load configuration: file first (when present), then environment
    /// overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, FilamentError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| FilamentError::Io(format!("cannot read {}: {e}", path.display())))?;
                toml::from_str(&raw).map_err(|e| {
                    FilamentError::Serialization(format!("invalid config {}: {e}", path.display()))
                })?
            }
            Some(path) => {
                tracing::debug!("config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay environment variables onto the file-derived values.
    fn apply_env(&mut self) {
        if let Ok(origins) = std::env::var("FILAMENT_CORS_ORIGINS") {
            self.cors_origins = Some(origins);
        }
        if let Some(limit) = std::env::var("FILAMENT_RATE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.rate_limit = Some(limit);
        }
        if let Ok(key) = std::env::var("FILAMENT_API_KEY") {
            self.api_key = Some(key);
        }
    }

    /// Effective rate limit.
    #[must_use]
    pub fn rate_limit(&self) -> u32 {
        self.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT)
    }

    /// Effective API key; empty strings disable authentication.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file() {
        let config = ServerConfig::default();
        assert_eq!(config.rate_limit(), DEFAULT_RATE_LIMIT);
        assert!(config.api_key().is_none());
        assert!(config.cors_origins.is_none());
    }

    #[test]
    fn parses_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("filament.toml");
        std::fs::write(
            &path,
            "cors_origins = \"https://ops.example\"\nrate_limit = 7\n",
        )
        .expect("write");

        let config = ServerConfig::load(Some(&path)).expect("load");
        assert_eq!(config.cors_origins.as_deref(), Some("https://ops.example"));
        assert_eq!(config.rate_limit(), 7);
    }

    #[test]
    fn missing_file_is_fine() {
        let config =
            ServerConfig::load(Some(Path::new("/nonexistent/filament.toml"))).expect("load");
        assert_eq!(config.rate_limit(), DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn empty_api_key_disables_auth() {
        let config = ServerConfig {
            api_key: Some(String::new()),
            ..ServerConfig::default()
        };
        assert!(config.api_key().is_none());
    }
}
