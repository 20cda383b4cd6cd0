// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Credential selection policy.
//!
//! Uniform random choice with no memory between calls: no round-robin, no
//! weighting, no stickiness.

use rand::seq::SliceRandom;

/// Pick one element uniformly at random, or `None` if `candidates` is empty.
pub fn pick_random<T>(candidates: &[T]) -> Option<&T> {
    candidates.choose(&mut rand::thread_rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_empty_is_unavailable() {
        let empty: Vec<String> = Vec::new();
        assert!(pick_random(&empty).is_none());
    }

    #[test]
    fn test_single_candidate() {
        assert_eq!(pick_random(&["only"]), Some(&"only"));
    }

    #[test]
    fn test_every_candidate_reachable() {
        let ids = ["a", "b", "c"];
        let mut seen = HashSet::new();
        for _ in 0..500 {
            seen.insert(*pick_random(&ids).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }
}
