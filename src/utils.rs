// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for relaygate.

/// Number of characters kept at each end of a masked credential.
const VISIBLE_EDGE: usize = 4;

/// Mask an upstream credential for logs and CLI output.
///
/// Keeps the first and last four characters of long values. Short values are
/// fully hidden so their length is the only thing that leaks.
///
/// # Examples
///
/// ```
/// use relaygate::utils::mask_credential;
///
/// assert_eq!(mask_credential("0123456789abcdef"), "0123...cdef");
/// assert_eq!(mask_credential("short"), "****");
/// ```
pub fn mask_credential(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= VISIBLE_EDGE * 2 {
        return "****".to_string();
    }

    let head: String = chars[..VISIBLE_EDGE].iter().collect();
    let tail: String = chars[chars.len() - VISIBLE_EDGE..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_credential() {
        assert_eq!(mask_credential("abcdefghijklmnop"), "abcd...mnop");
        assert_eq!(mask_credential("12345678"), "****");
        assert_eq!(mask_credential(""), "****");
    }

    #[test]
    fn test_mask_multibyte() {
        assert_eq!(mask_credential("会话会话会话会话会话"), "会话会话...会话会话");
    }
}
