// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Gateway configuration.
//!
//! Resolution order: built-in defaults, then an optional JSON file, then
//! command-line flags and environment variables (applied by the binary).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::credentials::EnvCredentials;
use crate::fetch::FetchConfig;
use crate::store::JsonFileStore;
use crate::upstream::DEFAULT_LIVENESS_PATH;

/// Default port, matching the upstream API's usual deployment.
pub const DEFAULT_PORT: u16 = 8000;

/// Default request body limit (10 MiB, enough for image payloads).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind to (defaults to 127.0.0.1 for security).
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Directory holding `sessions.json`.
    pub data_dir: PathBuf,
    /// Comma-separated upstream session ids imported at startup.
    pub session_ids: Option<String>,
    /// Base URL of the upstream service.
    pub upstream_url: Option<String>,
    /// Path of the upstream liveness endpoint.
    pub liveness_path: String,
    /// Timeout and retry policy for outbound calls.
    pub fetch: FetchConfig,
    /// Maximum accepted request body size.
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("data"),
            session_ids: None,
            upstream_url: None,
            liveness_path: DEFAULT_LIVENESS_PATH.to_string(),
            fetch: FetchConfig::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl GatewayConfig {
    /// Load a configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Load `path` if given, otherwise start from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// The session store described by this configuration.
    pub fn session_store(&self) -> JsonFileStore {
        JsonFileStore::in_dir(&self.data_dir)
    }

    /// The environment credential source described by this configuration.
    pub fn env_credentials(&self) -> EnvCredentials {
        EnvCredentials::new(self.session_ids.clone())
    }

    /// `bind_address:port`.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_address(), "127.0.0.1:8000");
        assert_eq!(config.fetch.retries, 2);
        assert_eq!(config.liveness_path, "/token/check");
        assert!(config.session_store().path().ends_with("data/sessions.json"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("relaygate.json");
        fs::write(
            &path,
            r#"{"port": 9000, "upstream_url": "http://up", "fetch": {"timeout_ms": 500}}"#,
        )
        .unwrap();

        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.upstream_url.as_deref(), Some("http://up"));
        assert_eq!(config.fetch.timeout_ms, 500);
        assert_eq!(config.fetch.retries, 2);
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_missing_file_is_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        assert!(GatewayConfig::load(&temp_dir.path().join("absent.json")).is_err());
        assert!(GatewayConfig::load_or_default(None).is_ok());
    }
}
