// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Upstream service client.
//!
//! Two jobs, both going through [`ResilientFetcher`]:
//!
//! - liveness checks: does the upstream still accept a session credential?
//!   Exposed behind the [`LivenessValidator`] trait so the admin surface can
//!   be driven by a fake in tests.
//! - relaying: forwarding a caller's request verbatim with a pooled
//!   credential attached.
//!
//! # Liveness wire contract
//!
//! `POST {upstream_url}{liveness_path}` with body `{"token": "<session id>"}`.
//! A 2xx answer carries `{"live": true|false}`; 401 and 403 mean "not live".

use async_trait::async_trait;
use axum::body::Bytes;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::fetch::{FetchError, ResilientFetcher};
use crate::utils::mask_credential;

/// Default path of the upstream liveness endpoint.
pub const DEFAULT_LIVENESS_PATH: &str = "/token/check";

/// Maximum length of an upstream error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Upstream call failures.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No upstream URL was configured.
    #[error("Upstream URL is not configured")]
    NotConfigured,

    /// The call never produced a response.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The upstream answered with an unexpected status.
    #[error("Upstream answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The upstream answered 2xx with a body we could not parse.
    #[error("Failed to decode upstream response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Checks whether a raw session credential is currently accepted upstream.
#[async_trait]
pub trait LivenessValidator: Send + Sync {
    async fn is_live(&self, session_id: &str) -> Result<bool, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct LivenessResponse {
    live: bool,
}

/// A caller request to forward upstream.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    /// Path plus optional query string, starting with `/`.
    pub path_and_query: String,
    pub content_type: Option<HeaderValue>,
    pub accept: Option<HeaderValue>,
    pub body: Bytes,
}

/// HTTP client for the upstream service.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    base_url: Option<String>,
    liveness_path: String,
    fetcher: ResilientFetcher,
}

impl UpstreamClient {
    /// Create a client for `base_url`. `None` leaves the client unconfigured:
    /// every call fails with [`UpstreamError::NotConfigured`].
    pub fn new(base_url: Option<String>, fetcher: ResilientFetcher) -> Self {
        let base_url = base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        Self {
            base_url,
            liveness_path: DEFAULT_LIVENESS_PATH.to_string(),
            fetcher,
        }
    }

    /// Override the liveness endpoint path.
    pub fn with_liveness_path(mut self, path: impl Into<String>) -> Self {
        self.liveness_path = path.into();
        self
    }

    /// Returns true if an upstream URL is set.
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// The normalized upstream URL.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn url(&self, path_and_query: &str) -> Result<String, UpstreamError> {
        let base = self.base_url.as_ref().ok_or(UpstreamError::NotConfigured)?;
        if path_and_query.starts_with('/') {
            Ok(format!("{}{}", base, path_and_query))
        } else {
            Ok(format!("{}/{}", base, path_and_query))
        }
    }

    /// Forward `request` upstream using `credential` as bearer token.
    ///
    /// The response is returned whatever its status.
    pub async fn relay(
        &self,
        request: &RelayRequest,
        credential: &str,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = self.url(&request.path_and_query)?;
        let bearer = format!("Bearer {}", credential);

        tracing::debug!(
            method = %request.method,
            path = %request.path_and_query,
            credential = %mask_credential(credential),
            "Relaying request upstream"
        );

        let response = self
            .fetcher
            .send(|client| {
                let mut builder = client
                    .request(request.method.clone(), &url)
                    .header(AUTHORIZATION, bearer.as_str())
                    .body(request.body.clone());
                if let Some(content_type) = &request.content_type {
                    builder = builder.header(CONTENT_TYPE, content_type.clone());
                }
                if let Some(accept) = &request.accept {
                    builder = builder.header(ACCEPT, accept.clone());
                }
                builder
            })
            .await?;

        Ok(response)
    }
}

#[async_trait]
impl LivenessValidator for UpstreamClient {
    async fn is_live(&self, session_id: &str) -> Result<bool, UpstreamError> {
        let url = self.url(&self.liveness_path)?;
        let body = serde_json::json!({ "token": session_id });

        let response = self
            .fetcher
            .fetch(|client| client.post(&url).json(&body))
            .await?;

        let status = response.status;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::info!(
                session = %mask_credential(session_id),
                "Upstream rejected session credential"
            );
            return Ok(false);
        }

        if !status.is_success() {
            let text = String::from_utf8_lossy(&response.body);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let liveness: LivenessResponse =
            serde_json::from_slice(&response.body).map_err(UpstreamError::Decode)?;
        tracing::debug!(
            session = %mask_credential(session_id),
            live = liveness.live,
            "Liveness check complete"
        );
        Ok(liveness.live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = UpstreamClient::new(
            Some(" http://upstream.local/ ".to_string()),
            ResilientFetcher::default(),
        );
        assert_eq!(client.base_url(), Some("http://upstream.local"));
        assert_eq!(
            client.url("/v1/models").unwrap(),
            "http://upstream.local/v1/models"
        );
        assert_eq!(client.url("ping").unwrap(), "http://upstream.local/ping");
    }

    #[test]
    fn test_blank_url_is_unconfigured() {
        let client = UpstreamClient::new(Some("   ".to_string()), ResilientFetcher::default());
        assert!(!client.is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_liveness_fails() {
        let client = UpstreamClient::new(None, ResilientFetcher::default());
        let err = client.is_live("sid").await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotConfigured));
    }
}
