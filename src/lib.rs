// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! relaygate - credential-pool gateway library
//!
//! Keeps a pool of upstream session credentials, persists it as JSON, and
//! hands one out for every outbound call:
//!
//! **Caller's Authorization header** -> **Pool (active sessions)** -> **SESSION_ID env**
//!
//! # Core Modules
//!
//! - [`pool`] - Session pool: lazy initialization, CRUD, random selection
//! - [`store`] - Durable session storage (`sessions.json`)
//! - [`credentials`] - Comma-separated credentials from the environment
//! - [`fetch`] - Timeout-and-retry wrapper for outbound HTTP
//! - [`upstream`] - Upstream liveness checks and request relaying
//! - [`dispatch`] - Choosing the credential for one outbound call
//! - [`server`] - HTTP admin API and relay
//! - [`errors`] - User-facing error categories

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod errors;
pub mod fetch;
pub mod locks;
pub mod pool;
pub mod selector;
pub mod server;
pub mod store;
pub mod types;
pub mod utils;
pub mod upstream;

pub use config::GatewayConfig;
pub use credentials::EnvCredentials;
pub use errors::{ApiResult, UserError};
pub use fetch::{FetchConfig, FetchError, ResilientFetcher};
pub use pool::{PoolCounts, PoolError, Readiness, SessionPool};
pub use server::{AppState, Server};
pub use store::{JsonFileStore, SessionStore};
pub use types::{Session, SessionPatch};
pub use upstream::{LivenessValidator, UpstreamClient, UpstreamError};
pub use utils::mask_credential;
