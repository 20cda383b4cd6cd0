// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-recovering lock helpers.
//!
//! A panic while the pool's lock is held must not take every later admin or
//! relay request down with it. These helpers log the poisoning and hand back
//! the guard anyway: every pool mutation leaves the collection in a valid
//! state between statements, so the data behind a poisoned lock is usable.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read guard, recovering it if the lock is poisoned.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "relaygate::locks",
            event = "LOCK_POISONED_READ",
            "RwLock poisoned during read; recovering guard"
        );
        poisoned.into_inner()
    })
}

/// Acquire a write guard, recovering it if the lock is poisoned.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::error!(
            target: "relaygate::locks",
            event = "LOCK_POISONED_WRITE",
            "RwLock poisoned during write; recovering guard"
        );
        poisoned.into_inner()
    })
}
