// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session ids supplied through process configuration.
//!
//! The raw value is a comma-separated list (`SESSION_ID=a,b,c`). It is read
//! once at startup and consulted again only when the pool has no active
//! session to hand out.

/// Environment variable holding comma-separated upstream session ids.
pub const SESSION_ID_ENV: &str = "SESSION_ID";

/// Read-only source of configured session ids.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    raw: Option<String>,
}

impl EnvCredentials {
    /// Wrap a raw comma-separated value.
    pub fn new(raw: Option<String>) -> Self {
        Self { raw }
    }

    /// Read the value of [`SESSION_ID_ENV`] from the process environment.
    pub fn from_env() -> Self {
        Self::new(std::env::var(SESSION_ID_ENV).ok())
    }

    /// Configured ids in declaration order, trimmed, blanks dropped.
    pub fn session_ids(&self) -> Vec<String> {
        self.raw
            .as_deref()
            .map(split_ids)
            .unwrap_or_default()
    }

    /// Returns true if no usable id is configured.
    pub fn is_empty(&self) -> bool {
        self.session_ids().is_empty()
    }
}

/// Split a comma-separated id list, trimming each entry and dropping blanks.
pub fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
