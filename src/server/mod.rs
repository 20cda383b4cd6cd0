// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! API server
//!
//! # Endpoints
//!
//! - `GET /health` - Health check with pool counts
//! - `GET /ping` - Liveness probe
//! - `GET /admin/sessions` - List sessions
//! - `POST /admin/sessions` - Validate upstream, then add a session
//! - `POST /admin/test-session` - Check a session without adding it
//! - `PUT /admin/sessions/:session_id` - Rename or (de)activate a session
//! - `DELETE /admin/sessions/:session_id` - Remove a session
//! - `POST /token/check` - Check an upstream credential
//! - `ANY /v1/*path` - Relay to the upstream service with a pooled credential
//!
//! # Example
//!
//! ```no_run
//! use relaygate::config::GatewayConfig;
//! use relaygate::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = Server::new(GatewayConfig::default());
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::error_handling::HandleErrorLayer;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{any, get, post, put};
use axum::{BoxError, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::errors::{ApiResult, UserError};
use crate::fetch::ResilientFetcher;
use crate::pool::{Readiness, SessionPool};
use crate::upstream::{LivenessValidator, UpstreamClient};

/// Extra time a request may take beyond its worst-case upstream budget.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Server state shared across handlers.
pub struct AppState {
    /// The session pool.
    pub pool: Arc<SessionPool>,
    /// Liveness checks for admin and token endpoints.
    pub validator: Arc<dyn LivenessValidator>,
    /// Upstream client used by the relay.
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(
        pool: Arc<SessionPool>,
        validator: Arc<dyn LivenessValidator>,
        upstream: UpstreamClient,
    ) -> Self {
        Self {
            pool,
            validator,
            upstream,
        }
    }
}

/// Build the router with all routes.
pub fn router(state: Arc<AppState>, config: &GatewayConfig) -> Router {
    // A relayed call may use every retry window before giving up
    let fetch = config.fetch;
    let request_timeout =
        fetch.timeout() * (fetch.retries.saturating_add(1)) + REQUEST_TIMEOUT_MARGIN;

    let routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ping", get(ping_handler))
        .route(
            "/admin/sessions",
            get(admin::list_sessions).post(admin::add_session),
        )
        .route("/admin/test-session", post(admin::test_session))
        .route(
            "/admin/sessions/:session_id",
            put(admin::update_session).delete(admin::delete_session),
        )
        .route("/token/check", post(relay::token_check))
        .route("/v1/*path", any(relay::relay_handler))
        .layer(DefaultBodyLimit::max(config.max_body_bytes));

    with_request_timeout(routes, request_timeout)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fail requests that run longer than `timeout` with a `request_failed` 504.
pub fn with_request_timeout<S>(router: Router<S>, timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_middleware_error))
            .timeout(timeout),
    )
}

async fn handle_middleware_error(error: BoxError) -> UserError {
    if error.is::<tower::timeout::error::Elapsed>() {
        UserError::request_failed(
            StatusCode::GATEWAY_TIMEOUT,
            "The request took too long to complete. Please try again.",
            None,
        )
    } else {
        UserError::request_failed(
            StatusCode::INTERNAL_SERVER_ERROR,
            "An unexpected error occurred.",
            Some(&error.to_string()),
        )
    }
}

/// Run a pool operation on the blocking thread pool.
///
/// Pool operations may touch the session file, so they stay off the async
/// worker threads.
pub(crate) async fn with_pool<T, F>(pool: &Arc<SessionPool>, op: F) -> ApiResult<T>
where
    F: FnOnce(&SessionPool) -> T + Send + 'static,
    T: Send + 'static,
{
    let pool = Arc::clone(pool);
    tokio::task::spawn_blocking(move || op(&pool))
        .await
        .map_err(|e| {
            UserError::request_failed(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Session pool operation failed.",
                Some(&e.to_string()),
            )
        })
}

/// API server.
#[derive(Debug, Clone)]
pub struct Server {
    config: GatewayConfig,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

impl Server {
    /// Create a server from a resolved configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// The server configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get the port.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Construct the pool and upstream client. The pool is not yet initialized.
    pub fn build_state(&self) -> Arc<AppState> {
        let pool = Arc::new(SessionPool::new(
            self.config.session_store(),
            self.config.env_credentials(),
        ));

        let upstream = UpstreamClient::new(
            self.config.upstream_url.clone(),
            ResilientFetcher::new(self.config.fetch),
        )
        .with_liveness_path(self.config.liveness_path.clone());

        if !upstream.is_configured() {
            tracing::warn!(
                "No upstream URL configured: session validation and relaying will fail. \
                Set --upstream-url or UPSTREAM_URL."
            );
        }

        Arc::new(AppState::new(pool, Arc::new(upstream.clone()), upstream))
    }

    /// Initialize the pool, then serve until SIGINT/SIGTERM.
    pub async fn start(&self) -> Result<()> {
        let state = self.build_state();

        let pool = Arc::clone(&state.pool);
        tokio::task::spawn_blocking(move || pool.initialize())
            .await
            .context("Session pool initialization panicked")?;

        let counts = state.pool.counts();
        tracing::info!(
            "Session pool ready: {} sessions ({} active)",
            counts.total,
            counts.active
        );

        let router = router(state, &self.config);
        let addr = self.config.listen_address();

        tracing::info!("Starting server on {}", addr);

        if self.config.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes the admin API to the network. \
                Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. Stop the other process or pick another port with --port <PORT>",
                    self.config.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    pool: Readiness,
    sessions: usize,
    active_sessions: usize,
    upstream_configured: bool,
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let (counts, pool) =
        with_pool(&state.pool, |pool| (pool.counts(), pool.readiness())).await?;

    Ok(Json(HealthResponse {
        status: if counts.active > 0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        pool,
        sessions: counts.total,
        active_sessions: counts.active,
        upstream_configured: state.upstream.is_configured(),
    }))
}

async fn ping_handler() -> &'static str {
    "pong"
}

/// Wait for SIGINT/SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
