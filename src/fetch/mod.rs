// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Timeout-and-retry wrapper for outbound HTTP calls.
//!
//! Every attempt runs under its own wall-clock timeout. Timeouts and
//! connection-level failures are retried immediately, up to the configured
//! number of retries. Any response that arrives, whatever its status, is
//! returned to the caller as-is: interpreting a non-2xx answer is the
//! caller's job.
//!
//! The worst-case latency of one call is `timeout * (1 + retries)`.
//!
//! # Example
//!
//! ```no_run
//! use relaygate::fetch::{FetchConfig, ResilientFetcher};
//!
//! # async fn example() -> Result<(), relaygate::fetch::FetchError> {
//! let fetcher = ResilientFetcher::new(FetchConfig::default());
//! let response = fetcher
//!     .send(|client| client.get("http://127.0.0.1:8000/ping"))
//!     .await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use axum::body::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-attempt timeout (milliseconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// Timeout and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
        }
    }
}

impl FetchConfig {
    /// Per-attempt timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Outbound call failures.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The attempt did not complete within its timeout window.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure (refused, reset, DNS, broken body).
    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The request itself is unusable (bad URL, redirect loop). Never retried.
    #[error("Request error: {0}")]
    Request(#[source] reqwest::Error),
}

impl FetchError {
    /// Returns true for failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::Transport(_))
    }

    /// Returns true if the call ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Transport(e) => e.is_timeout(),
            FetchError::Request(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() || e.is_redirect() {
            FetchError::Request(e)
        } else {
            FetchError::Transport(e)
        }
    }
}

/// HTTP client wrapper adding per-attempt timeouts and immediate retries.
#[derive(Debug, Clone)]
pub struct ResilientFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl Default for ResilientFetcher {
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

impl ResilientFetcher {
    /// Create a fetcher with a fresh [`reqwest::Client`].
    ///
    /// The client carries the per-attempt timeout too, so response bodies
    /// streamed after [`send`](Self::send) returns are bounded as well.
    pub fn new(config: FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self::with_client(client, config)
    }

    /// Create a fetcher around an existing client.
    pub fn with_client(client: reqwest::Client, config: FetchConfig) -> Self {
        Self { client, config }
    }

    /// The active timeout and retry settings.
    pub fn config(&self) -> FetchConfig {
        self.config
    }

    /// Send the request produced by `build`, retrying transport failures.
    ///
    /// `build` is called once per attempt so each retry sends a fresh request.
    /// Returns the first response received, or the last transport failure
    /// once the retries are exhausted. Only the wait for the response head is
    /// covered by the attempt timeout.
    pub async fn send<F>(&self, build: F) -> Result<reqwest::Response, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let build = &build;
        let client = &self.client;
        self.with_retries(move || build(client).send()).await
    }

    /// Like [`send`](Self::send), but the whole body is read inside the same
    /// attempt timeout. A stalled body counts as a timed-out attempt.
    pub async fn fetch<F>(&self, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let build = &build;
        let client = &self.client;
        self.with_retries(move || async move {
            let response = build(client).send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(FetchedResponse { status, body })
        })
        .await
    }

    async fn with_retries<T, A, Fut>(&self, attempt_fn: A) -> Result<T, FetchError>
    where
        A: Fn() -> Fut,
        Fut: Future<Output = Result<T, reqwest::Error>>,
    {
        let timeout = self.config.timeout();
        let attempts = self.config.retries + 1;
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(timeout, attempt_fn()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => FetchError::from(e),
                Err(_) => FetchError::Timeout(timeout),
            };

            if !outcome.is_retryable() || attempt >= attempts {
                if outcome.is_retryable() {
                    tracing::warn!(attempts, "Outbound request failed after all retries: {}", outcome);
                }
                return Err(outcome);
            }

            tracing::warn!(
                "Outbound request failed, retrying ({}/{}): {}",
                attempt,
                self.config.retries,
                outcome
            );
            attempt += 1;
        }
    }
}

/// A response read to completion.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub body: Bytes,
}
