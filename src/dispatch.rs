// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Credential resolution for outbound business calls.
//!
//! A caller may bring its own upstream credentials as
//! `Authorization: Bearer id1,id2`. Otherwise the pool picks one.

use crate::credentials::split_ids;
use crate::pool::SessionPool;
use crate::selector::pick_random;

/// Extract caller-supplied credentials from an `Authorization` header value.
///
/// The `Bearer ` prefix is optional and matched case-insensitively.
pub fn caller_credentials(authorization: &str) -> Vec<String> {
    let value = authorization.trim();
    let ids = match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => &value[7..],
        _ => value,
    };
    split_ids(ids)
}

/// Pick the upstream credential for one outbound call.
///
/// Caller-supplied credentials win; with none, the pool's selection
/// (including its environment fallback) is used.
pub fn select_credential(pool: &SessionPool, authorization: Option<&str>) -> Option<String> {
    let supplied = authorization.map(caller_credentials).unwrap_or_default();
    if let Some(id) = pick_random(&supplied) {
        return Some(id.clone());
    }
    pool.random_session_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::EnvCredentials;
    use crate::store::JsonFileStore;
    use tempfile::TempDir;

    #[test]
    fn test_caller_credentials_parsing() {
        assert_eq!(caller_credentials("Bearer a, b"), vec!["a", "b"]);
        assert_eq!(caller_credentials("bearer x"), vec!["x"]);
        assert_eq!(caller_credentials("raw1,raw2"), vec!["raw1", "raw2"]);
        assert!(caller_credentials("Bearer  ").is_empty());
        assert!(caller_credentials("").is_empty());
    }

    #[test]
    fn test_caller_credentials_take_priority() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = SessionPool::new(
            JsonFileStore::in_dir(temp_dir.path()),
            EnvCredentials::new(Some("pooled".to_string())),
        );

        assert_eq!(
            select_credential(&pool, Some("Bearer mine")),
            Some("mine".to_string())
        );
        assert_eq!(select_credential(&pool, Some("Bearer ")), Some("pooled".to_string()));
        assert_eq!(select_credential(&pool, None), Some("pooled".to_string()));
    }

    #[test]
    fn test_nothing_available() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = SessionPool::new(
            JsonFileStore::in_dir(temp_dir.path()),
            EnvCredentials::default(),
        );
        assert_eq!(select_credential(&pool, None), None);
    }
}
