// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User-facing error handling for the HTTP surface.
//!
//! Every failure a caller sees falls into one of two categories:
//!
//! - `params_invalid` (400): malformed input, or a credential the upstream
//!   refuses.
//! - `request_failed`: a well-formed request that could not complete. The
//!   HTTP status depends on the cause (404 unknown session, 500 persistence,
//!   502/504 upstream transport, 503 nothing to dispatch with).
//!
//! Each error carries a reference code. Internal details are logged next to
//! that code, sanitized, and never sent to the caller.

use std::sync::LazyLock;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rand::Rng;
use regex::Regex;
use serde::Serialize;

use crate::fetch::FetchError;
use crate::pool::PoolError;
use crate::upstream::UpstreamError;

/// Generate a unique error reference code.
/// Format: ERR-YYYYMMDD-XXXXXX (e.g., ERR-20250115-A3F8K2)
pub fn generate_reference_code() -> String {
    let date = Utc::now().format("%Y%m%d");
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789".chars().collect();
    let random: String = (0..6)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect();
    format!("ERR-{}-{}", date, random)
}

/// Error returned to HTTP callers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum UserError {
    /// Malformed input or a rejected credential (400).
    ParamsInvalid {
        message: String,
        reference: String,
        field: Option<String>,
    },

    /// A valid request that could not be completed.
    RequestFailed {
        message: String,
        reference: String,
        #[serde(skip)]
        status: StatusCode,
    },
}

/// JSON body of an error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: UserError,
    pub status: u16,
}

impl UserError {
    /// Create a ParamsInvalid error, logging internal details if given.
    pub fn params_invalid(
        user_message: &str,
        field: Option<&str>,
        internal_details: Option<&str>,
    ) -> Self {
        let reference = generate_reference_code();

        if let Some(details) = internal_details {
            tracing::warn!(
                reference = %reference,
                internal_details = %sanitize_error_details(details),
                field = ?field,
                "Invalid request parameters"
            );
        }

        Self::ParamsInvalid {
            message: user_message.to_string(),
            reference,
            field: field.map(str::to_string),
        }
    }

    /// Create a RequestFailed error, logging internal details if given.
    pub fn request_failed(
        status: StatusCode,
        user_message: &str,
        internal_details: Option<&str>,
    ) -> Self {
        let reference = generate_reference_code();

        match internal_details {
            Some(details) if status.is_server_error() => tracing::error!(
                reference = %reference,
                status = status.as_u16(),
                internal_details = %sanitize_error_details(details),
                "Request failed"
            ),
            Some(details) => tracing::info!(
                reference = %reference,
                status = status.as_u16(),
                internal_details = %sanitize_error_details(details),
                "Request failed"
            ),
            None => {}
        }

        Self::RequestFailed {
            message: user_message.to_string(),
            reference,
            status,
        }
    }

    /// No credential could be found for an outbound call.
    pub fn no_session_available() -> Self {
        Self::request_failed(
            StatusCode::SERVICE_UNAVAILABLE,
            "No session available. Set SESSION_ID or add and activate a session on the admin API.",
            None,
        )
    }

    /// Map an upstream transport or protocol failure.
    pub fn upstream(error: &UpstreamError) -> Self {
        let details = error.to_string();
        match error {
            UpstreamError::NotConfigured => Self::request_failed(
                StatusCode::SERVICE_UNAVAILABLE,
                "Upstream service is not configured.",
                Some(&details),
            ),
            UpstreamError::Fetch(fetch) if fetch.is_timeout() => Self::request_failed(
                StatusCode::GATEWAY_TIMEOUT,
                "The upstream service timed out. Please try again.",
                Some(&details),
            ),
            UpstreamError::Fetch(FetchError::Request(_)) => Self::request_failed(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not build the upstream request.",
                Some(&details),
            ),
            _ => Self::request_failed(
                StatusCode::BAD_GATEWAY,
                "Unable to reach the upstream service. Please try again later.",
                Some(&details),
            ),
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UserError::ParamsInvalid { .. } => StatusCode::BAD_REQUEST,
            UserError::RequestFailed { status, .. } => *status,
        }
    }

    /// Reference code for this error.
    pub fn reference(&self) -> &str {
        match self {
            UserError::ParamsInvalid { reference, .. } => reference,
            UserError::RequestFailed { reference, .. } => reference,
        }
    }

    /// User-facing message.
    pub fn message(&self) -> &str {
        match self {
            UserError::ParamsInvalid { message, .. } => message,
            UserError::RequestFailed { message, .. } => message,
        }
    }
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let response = ErrorResponse {
            status: status.as_u16(),
            error: self,
        };

        let body = serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"error":{"error_type":"request_failed","message":"An unexpected error occurred","reference":"ERR-FALLBACK"},"status":500}"#.to_string()
        });

        (status, [("content-type", "application/json")], body).into_response()
    }
}

impl From<PoolError> for UserError {
    fn from(error: PoolError) -> Self {
        let details = error.to_string();
        match error {
            PoolError::NotFound(_) => Self::request_failed(
                StatusCode::NOT_FOUND,
                "Session does not exist.",
                Some(&details),
            ),
            PoolError::Persistence(_) => Self::request_failed(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to save sessions.",
                Some(&details),
            ),
        }
    }
}

impl From<JsonRejection> for UserError {
    fn from(rejection: JsonRejection) -> Self {
        Self::params_invalid(
            "Request body must be valid JSON matching the expected fields.",
            None,
            Some(&rejection.body_text()),
        )
    }
}

/// Patterns stripped from logged error details.
static SANITIZE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // File paths (Windows and Unix)
        (Regex::new(r"[A-Za-z]:\\[^\s]+").expect("Windows path regex"), "[PATH_REDACTED]"),
        (Regex::new(r"/(?:home|usr|var|etc|opt|tmp|root|srv|data)/[^\s]+").expect("Unix path regex"), "[PATH_REDACTED]"),

        // Credentials
        (Regex::new(r"(?i)Bearer [a-zA-Z0-9-._~+/,]+=*").expect("Bearer token regex"), "Bearer [TOKEN_REDACTED]"),
        (Regex::new(r#"(?i)"token"\s*:\s*"[^"]*""#).expect("Token field regex"), r#""token":"[TOKEN_REDACTED]""#),
        (Regex::new(r"\b[A-Za-z0-9]{32,}\b").expect("Long secret regex"), "[SECRET_REDACTED]"),
    ]
});

/// Remove file paths and credentials from error details before logging.
pub fn sanitize_error_details(error: &str) -> String {
    let mut result = error.to_string();

    for (pattern, replacement) in SANITIZE_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}

/// Result type that uses UserError for the error variant.
pub type ApiResult<T> = Result<T, UserError>;
