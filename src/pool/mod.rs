// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session pool: the authoritative in-memory view of upstream credentials.
//!
//! The pool merges two sources of truth, the persisted [`SessionStore`] and
//! the [`EnvCredentials`] from process configuration, and exposes the CRUD
//! and selection operations the rest of the gateway uses.
//!
//! ## Lifecycle
//!
//! The pool starts [`Readiness::Uninitialized`]. [`SessionPool::initialize`]
//! loads the store, appends environment ids not already present, persists
//! the merged list once, and moves to [`Readiness::Ready`]. Every other public
//! operation initializes lazily, so calling `initialize` up front is optional.
//!
//! ## Persistence
//!
//! Each mutation changes the in-memory list under the lock, then writes a
//! snapshot of the whole list to the store after releasing it. Concurrent
//! mutations are never lost in memory, but their saves are not ordered: the
//! last save to complete defines what is on disk. A failed save is reported
//! to the caller as [`PoolError::Persistence`]; the in-memory change stays.
//!
//! ## Example
//!
//! ```no_run
//! use relaygate::credentials::EnvCredentials;
//! use relaygate::pool::SessionPool;
//! use relaygate::store::JsonFileStore;
//!
//! # fn example() -> Result<(), relaygate::pool::PoolError> {
//! let pool = SessionPool::new(
//!     JsonFileStore::in_dir("data"),
//!     EnvCredentials::new(Some("sA,sB".to_string())),
//! );
//! pool.initialize();
//! pool.add_session("sC", Some("manual"))?;
//! let credential = pool.random_session_id();
//! # Ok(())
//! # }
//! ```

use std::sync::RwLock;

use serde::Serialize;
use thiserror::Error;

use crate::credentials::EnvCredentials;
use crate::locks::{resilient_read, resilient_write};
use crate::selector::pick_random;
use crate::store::SessionStore;
use crate::types::{Session, SessionPatch, ENV_IMPORT_LABEL, MANUAL_LABEL};
use crate::utils::mask_credential;

/// Pool-layer failures.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No session with the given id exists. Holds the masked id.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The in-memory change was applied but could not be written to the store.
    #[error("Failed to persist sessions: {0:#}")]
    Persistence(anyhow::Error),
}

/// Initialization state of a [`SessionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Uninitialized,
    Ready,
}

/// Session counts for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    pub total: usize,
    pub active: usize,
}

struct PoolInner {
    readiness: Readiness,
    sessions: Vec<Session>,
}

/// Manager owning every known upstream session.
pub struct SessionPool {
    store: Box<dyn SessionStore>,
    env: EnvCredentials,
    inner: RwLock<PoolInner>,
}

impl SessionPool {
    /// Create an uninitialized pool over `store` and `env`.
    pub fn new(store: impl SessionStore + 'static, env: EnvCredentials) -> Self {
        Self {
            store: Box::new(store),
            env,
            inner: RwLock::new(PoolInner {
                readiness: Readiness::Uninitialized,
                sessions: Vec::new(),
            }),
        }
    }

    /// Load and merge both credential sources. No-op once ready.
    pub fn initialize(&self) {
        let mut inner = resilient_write(&self.inner);
        self.ensure_ready(&mut inner);
    }

    /// Current initialization state. Does not trigger initialization.
    pub fn readiness(&self) -> Readiness {
        resilient_read(&self.inner).readiness
    }

    /// Copy of every known session, in storage order.
    pub fn all_sessions(&self) -> Vec<Session> {
        self.read(|sessions| sessions.to_vec())
    }

    /// Ids of every active session, in storage order.
    pub fn active_session_ids(&self) -> Vec<String> {
        self.read(|sessions| {
            sessions
                .iter()
                .filter(|s| s.active)
                .map(|s| s.id.clone())
                .collect()
        })
    }

    /// Total and active session counts.
    pub fn counts(&self) -> PoolCounts {
        self.read(|sessions| PoolCounts {
            total: sessions.len(),
            active: sessions.iter().filter(|s| s.active).count(),
        })
    }

    /// Insert a session, or replace an existing one with the same id in place.
    ///
    /// Replacing sets the new name, forces `active` back to true and refreshes
    /// `updated_at`; `created_at` and the position are kept. The credential is
    /// not validated here, callers check liveness first.
    pub fn add_session(&self, id: &str, name: Option<&str>) -> Result<(), PoolError> {
        let name = name.unwrap_or(MANUAL_LABEL).to_string();

        self.mutate(|sessions| {
            match sessions.iter_mut().find(|s| s.id == id) {
                Some(existing) => {
                    existing.name = name;
                    existing.active = true;
                    existing.touch();
                    tracing::info!(session = %mask_credential(id), "Reactivated existing session");
                }
                None => {
                    sessions.push(Session::new(id, name));
                    tracing::info!(session = %mask_credential(id), "Added session");
                }
            }
            Ok(())
        })
    }

    /// Apply `patch` to the session with `id` and refresh its `updated_at`.
    ///
    /// An empty patch only refreshes the timestamp.
    pub fn update_session(&self, id: &str, patch: SessionPatch) -> Result<(), PoolError> {
        self.mutate(|sessions| {
            let session = sessions
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| PoolError::NotFound(mask_credential(id)))?;
            session.apply(patch);
            tracing::info!(
                session = %mask_credential(id),
                active = session.active,
                "Updated session"
            );
            Ok(())
        })
    }

    /// Remove the session with `id`.
    pub fn delete_session(&self, id: &str) -> Result<(), PoolError> {
        self.mutate(|sessions| {
            let before = sessions.len();
            sessions.retain(|s| s.id != id);
            if sessions.len() == before {
                return Err(PoolError::NotFound(mask_credential(id)));
            }
            tracing::info!(session = %mask_credential(id), "Deleted session");
            Ok(())
        })
    }

    /// One active session id chosen uniformly at random.
    ///
    /// With no active session, falls back to the environment ids without
    /// adding them to the pool. Returns `None` if both are empty.
    pub fn random_session_id(&self) -> Option<String> {
        let active = self.active_session_ids();
        if let Some(id) = pick_random(&active) {
            return Some(id.clone());
        }

        let env_ids = self.env.session_ids();
        let fallback = pick_random(&env_ids).cloned();
        if fallback.is_some() {
            tracing::debug!(
                candidates = env_ids.len(),
                "No active session in pool, using environment fallback"
            );
        }
        fallback
    }

    fn ensure_ready(&self, inner: &mut PoolInner) {
        if inner.readiness == Readiness::Ready {
            return;
        }
        inner.sessions = self.load_merged();
        inner.readiness = Readiness::Ready;
    }

    fn load_merged(&self) -> Vec<Session> {
        let mut sessions = match self.store.load() {
            Ok(sessions) => {
                tracing::info!("Loaded {} sessions from store", sessions.len());
                sessions
            }
            Err(e) => {
                tracing::error!("Failed to load session store, starting empty: {:#}", e);
                Vec::new()
            }
        };

        let env_ids = self.env.session_ids();
        if !env_ids.is_empty() {
            tracing::info!("Found {} session ids in environment", env_ids.len());
        }

        let imported = merge_env_ids(&mut sessions, &env_ids);
        if imported > 0 {
            match self.store.save(&sessions) {
                Ok(()) => tracing::info!("Imported {} sessions from environment", imported),
                Err(e) => tracing::error!(
                    "Imported {} sessions from environment but failed to persist them: {:#}",
                    imported,
                    e
                ),
            }
        }

        sessions
    }

    fn read<R>(&self, f: impl FnOnce(&[Session]) -> R) -> R {
        {
            let inner = resilient_read(&self.inner);
            if inner.readiness == Readiness::Ready {
                return f(&inner.sessions);
            }
        }

        let mut inner = resilient_write(&self.inner);
        self.ensure_ready(&mut inner);
        f(&inner.sessions)
    }

    fn mutate(
        &self,
        f: impl FnOnce(&mut Vec<Session>) -> Result<(), PoolError>,
    ) -> Result<(), PoolError> {
        let snapshot = {
            let mut inner = resilient_write(&self.inner);
            self.ensure_ready(&mut inner);
            f(&mut inner.sessions)?;
            inner.sessions.clone()
        };

        self.store.save(&snapshot).map_err(|e| {
            tracing::error!("Failed to persist sessions: {:#}", e);
            PoolError::Persistence(e)
        })
    }
}

/// Append a record for each id in `env_ids` not already present.
///
/// Returns the number of records appended.
fn merge_env_ids(sessions: &mut Vec<Session>, env_ids: &[String]) -> usize {
    let mut imported = 0;
    for id in env_ids {
        if !sessions.iter().any(|s| &s.id == id) {
            sessions.push(Session::new(id.clone(), ENV_IMPORT_LABEL));
            imported += 1;
        }
    }
    imported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// In-memory store that counts saves and can be told to fail them.
    #[derive(Clone, Default)]
    struct MemoryStore {
        data: Arc<Mutex<Vec<Session>>>,
        saves: Arc<AtomicUsize>,
        fail_saves: bool,
        fail_loads: bool,
    }

    impl SessionStore for MemoryStore {
        fn load(&self) -> anyhow::Result<Vec<Session>> {
            if self.fail_loads {
                return Err(anyhow!("document is corrupt"));
            }
            Ok(self.data.lock().unwrap().clone())
        }

        fn save(&self, sessions: &[Session]) -> anyhow::Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail_saves {
                return Err(anyhow!("disk full"));
            }
            *self.data.lock().unwrap() = sessions.to_vec();
            Ok(())
        }
    }

    fn env(raw: &str) -> EnvCredentials {
        EnvCredentials::new(Some(raw.to_string()))
    }

    fn file_pool(dir: &TempDir, raw_env: Option<&str>) -> SessionPool {
        SessionPool::new(
            JsonFileStore::in_dir(dir.path()),
            EnvCredentials::new(raw_env.map(str::to_string)),
        )
    }

    #[test]
    fn test_environment_import_scenario() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = file_pool(&temp_dir, Some("sA,sB"));
        pool.initialize();

        let sessions = pool.all_sessions();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.name == ENV_IMPORT_LABEL && s.active));

        let picked = pool.random_session_id().expect("a session should be available");
        assert!(picked == "sA" || picked == "sB");

        let persisted = JsonFileStore::in_dir(temp_dir.path()).load().unwrap();
        assert_eq!(persisted, sessions);
    }

    #[test]
    fn test_initialize_is_idempotent_and_saves_once() {
        let store = MemoryStore::default();
        let saves = Arc::clone(&store.saves);
        let pool = SessionPool::new(store, env("sA, sB ,sA"));

        assert_eq!(pool.readiness(), Readiness::Uninitialized);
        pool.initialize();
        pool.initialize();

        assert_eq!(pool.readiness(), Readiness::Ready);
        assert_eq!(pool.all_sessions().len(), 2);
        assert_eq!(saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restart_does_not_duplicate_environment_ids() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        file_pool(&temp_dir, Some("sA,sB")).initialize();

        let restarted = file_pool(&temp_dir, Some("sB,sC"));
        let ids: Vec<String> = restarted.all_sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["sA", "sB", "sC"]);
    }

    #[test]
    fn test_lazy_initialization_on_first_call() {
        let pool = SessionPool::new(MemoryStore::default(), env("sA"));
        assert_eq!(pool.readiness(), Readiness::Uninitialized);
        assert_eq!(pool.active_session_ids(), vec!["sA"]);
        assert_eq!(pool.readiness(), Readiness::Ready);
    }

    #[test]
    fn test_add_session_with_and_without_name() {
        let pool = SessionPool::new(MemoryStore::default(), EnvCredentials::default());
        pool.add_session("sC", Some("manual")).unwrap();
        pool.add_session("sD", None).unwrap();

        let sessions = pool.all_sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "manual");
        assert_eq!(sessions[1].name, MANUAL_LABEL);
        assert!(sessions.iter().all(|s| s.active));
    }

    #[test]
    fn test_re_add_replaces_in_place_and_reactivates() {
        let pool = SessionPool::new(MemoryStore::default(), EnvCredentials::default());
        pool.add_session("s1", Some("one")).unwrap();
        pool.add_session("s2", Some("two")).unwrap();
        pool.update_session(
            "s1",
            SessionPatch {
                name: None,
                active: Some(false),
            },
        )
        .unwrap();
        let created = pool.all_sessions()[0].created_at;

        pool.add_session("s1", Some("renamed")).unwrap();

        let sessions = pool.all_sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "s1");
        assert_eq!(sessions[0].name, "renamed");
        assert!(sessions[0].active);
        assert_eq!(sessions[0].created_at, created);
        assert!(sessions[0].updated_at >= created);
    }

    #[test]
    fn test_deactivate_scenario() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = file_pool(&temp_dir, Some("sA,sB"));
        pool.add_session("sC", Some("manual")).unwrap();
        assert_eq!(pool.all_sessions().len(), 3);

        pool.update_session(
            "sC",
            SessionPatch {
                name: None,
                active: Some(false),
            },
        )
        .unwrap();

        assert_eq!(pool.active_session_ids(), vec!["sA", "sB"]);
        assert_eq!(pool.all_sessions().len(), 3);
        assert_eq!(pool.counts(), PoolCounts { total: 3, active: 2 });
    }

    #[test]
    fn test_empty_patch_only_refreshes_timestamp() {
        let store = MemoryStore::default();
        store.data.lock().unwrap().push(Session {
            id: "old".to_string(),
            name: "legacy".to_string(),
            created_at: 1_000,
            updated_at: 2_000,
            active: false,
        });
        let pool = SessionPool::new(store, EnvCredentials::default());

        pool.update_session("old", SessionPatch::default()).unwrap();

        let session = &pool.all_sessions()[0];
        assert_eq!(session.name, "legacy");
        assert!(!session.active);
        assert_eq!(session.created_at, 1_000);
        assert!(session.updated_at > 2_000);
    }

    #[test]
    fn test_update_unknown_is_not_found() {
        let store = MemoryStore::default();
        let saves = Arc::clone(&store.saves);
        let pool = SessionPool::new(store, EnvCredentials::default());

        let err = pool
            .update_session("missing", SessionPatch::default())
            .unwrap_err();
        assert!(matches!(err, PoolError::NotFound(_)));
        assert_eq!(saves.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delete_known_and_unknown() {
        let pool = SessionPool::new(MemoryStore::default(), EnvCredentials::default());
        pool.add_session("s1", None).unwrap();
        pool.add_session("s2", None).unwrap();

        let err = pool.delete_session("nope").unwrap_err();
        assert!(matches!(err, PoolError::NotFound(_)));
        assert_eq!(pool.all_sessions().len(), 2);

        pool.delete_session("s1").unwrap();
        let ids: Vec<String> = pool.all_sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["s2"]);
    }

    #[test]
    fn test_deleted_environment_session_stays_deleted() {
        let pool = SessionPool::new(MemoryStore::default(), env("sA,sB"));
        pool.delete_session("sA").unwrap();
        pool.initialize();

        let ids: Vec<String> = pool.all_sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["sB"]);
    }

    #[test]
    fn test_active_ids_preserve_order() {
        let pool = SessionPool::new(MemoryStore::default(), EnvCredentials::default());
        for id in ["a", "b", "c", "d"] {
            pool.add_session(id, None).unwrap();
        }
        for id in ["b", "d"] {
            pool.update_session(
                id,
                SessionPatch {
                    name: None,
                    active: Some(false),
                },
            )
            .unwrap();
        }
        assert_eq!(pool.active_session_ids(), vec!["a", "c"]);
    }

    #[test]
    fn test_random_session_falls_back_to_environment() {
        let store = MemoryStore::default();
        let saves = Arc::clone(&store.saves);
        let pool = SessionPool::new(store, env("sA,sB"));
        for id in ["sA", "sB"] {
            pool.update_session(
                id,
                SessionPatch {
                    name: None,
                    active: Some(false),
                },
            )
            .unwrap();
        }
        let saves_before = saves.load(Ordering::SeqCst);

        let picked = pool.random_session_id().expect("fallback should yield an id");
        assert!(picked == "sA" || picked == "sB");
        assert!(pool.active_session_ids().is_empty());
        assert_eq!(saves.load(Ordering::SeqCst), saves_before);
    }

    #[test]
    fn test_random_session_unavailable_when_both_sources_empty() {
        let store = MemoryStore {
            fail_loads: true,
            ..MemoryStore::default()
        };
        let pool = SessionPool::new(store, EnvCredentials::default());
        assert!(pool.random_session_id().is_none());
    }

    #[test]
    fn test_corrupt_store_falls_back_to_empty() {
        let store = MemoryStore {
            fail_loads: true,
            ..MemoryStore::default()
        };
        let pool = SessionPool::new(store, env("sA"));
        pool.initialize();

        assert_eq!(pool.readiness(), Readiness::Ready);
        assert_eq!(pool.active_session_ids(), vec!["sA"]);
    }

    #[test]
    fn test_persistence_failure_is_reported() {
        let store = MemoryStore {
            fail_saves: true,
            ..MemoryStore::default()
        };
        let pool = SessionPool::new(store.clone(), EnvCredentials::default());

        let err = pool.add_session("s1", None).unwrap_err();
        assert!(matches!(err, PoolError::Persistence(_)));
        assert!(store.data.lock().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_adds_are_all_kept_in_memory() {
        let pool = Arc::new(SessionPool::new(
            MemoryStore::default(),
            EnvCredentials::default(),
        ));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.add_session(&format!("s{}", i), None))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(pool.all_sessions().len(), 16);
    }

    #[test]
    fn test_concurrent_file_backed_adds_persist_without_errors() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = Arc::new(file_pool(&temp_dir, None));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        pool.add_session(&format!("t{}-{}", t, i), None)
                            .expect("save should not fail under concurrency");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread panicked");
        }

        assert_eq!(pool.all_sessions().len(), 400);
        // The document is a complete snapshot from one of the saves
        let persisted = JsonFileStore::in_dir(temp_dir.path()).load().unwrap();
        assert!(!persisted.is_empty());
        assert!(persisted.len() <= 400);
    }
}
