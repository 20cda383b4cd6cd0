// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across relaygate.
//!
//! A [`Session`] wraps one opaque upstream credential plus the metadata the
//! gateway keeps about it. The field names match the persisted document, so
//! the same struct is used in memory, on disk, and on the admin API.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Label given to sessions imported from the process environment.
pub const ENV_IMPORT_LABEL: &str = "imported from environment";

/// Label given to sessions added without an explicit name.
pub const MANUAL_LABEL: &str = "manually added";

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// One upstream credential known to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Raw upstream session credential. Sensitive.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// Creation instant (Unix milliseconds).
    pub created_at: i64,
    /// Last modification instant (Unix milliseconds).
    pub updated_at: i64,
    /// Whether the session is eligible for selection.
    pub active: bool,
}

impl Session {
    /// Create an active session stamped with the current time.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            active: true,
        }
    }

    /// Refresh `updated_at`.
    ///
    /// Never moves the timestamp backwards and never below `created_at`, even
    /// if the system clock has stepped back since the last write.
    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at).max(self.created_at);
    }

    /// Apply the fields present in `patch` and refresh `updated_at`.
    pub fn apply(&mut self, patch: SessionPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        self.touch();
    }
}

/// Partial update for a [`Session`]. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl SessionPatch {
    /// Returns true if the patch carries no field at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.active.is_none()
    }
}
