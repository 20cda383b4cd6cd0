// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable storage for session records.
//!
//! The store is pure persistence: it loads and saves the whole ordered list of
//! sessions and applies no business rules. [`JsonFileStore`] keeps the list in
//! a single pretty-printed JSON document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use crate::types::Session;

/// File name of the session document inside the data directory.
pub const SESSION_FILE_NAME: &str = "sessions.json";

/// Whole-collection session persistence.
///
/// `save` overwrites everything previously stored. Implementations do not
/// coordinate concurrent writers; the last completed save wins.
pub trait SessionStore: Send + Sync {
    /// Load every stored session in storage order.
    fn load(&self) -> Result<Vec<Session>>;

    /// Replace the stored collection with `sessions`.
    fn save(&self, sessions: &[Session]) -> Result<()>;
}

/// Session store backed by one JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store for the document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store for `sessions.json` inside `data_dir`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(SESSION_FILE_NAME))
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the parent directory and an empty document if none exists yet.
    pub fn ensure_exists(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create data directory: {:?}", parent))?;
            }
        }

        if !self.path.exists() {
            fs::write(&self.path, "[]")
                .with_context(|| format!("Failed to create session store: {:?}", self.path))?;
            tracing::info!("Created empty session store at {:?}", self.path);
        }

        Ok(())
    }
}

impl SessionStore for JsonFileStore {
    fn load(&self) -> Result<Vec<Session>> {
        self.ensure_exists()?;

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session store: {:?}", self.path))?;
        let sessions: Vec<Session> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session store: {:?}", self.path))?;

        Ok(sessions)
    }

    fn save(&self, sessions: &[Session]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory: {:?}", dir))?;

        let content = serde_json::to_string_pretty(sessions)
            .context("Failed to serialize sessions to JSON")?;

        // One temp file per save so concurrent writers never share a scratch file
        let mut temp_file = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {:?}", dir))?;

        temp_file
            .write_all(content.as_bytes())
            .context("Failed to write to temp file")?;

        temp_file
            .as_file()
            .sync_all()
            .context("Failed to sync temp file to disk")?;

        // Rename is atomic on POSIX, so readers never observe a half-written document
        temp_file.persist(&self.path).with_context(|| {
            format!("Failed to move temp file over session store: {:?}", self.path)
        })?;

        tracing::debug!("Saved {} sessions to {:?}", sessions.len(), self.path);
        Ok(())
    }
}
