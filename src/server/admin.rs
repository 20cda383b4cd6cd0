// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session administration endpoints.
//!
//! A thin CRUD layer over [`SessionPool`](crate::pool::SessionPool). Adding
//! a session checks its liveness upstream first; everything else goes
//! straight to the pool.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use super::{with_pool, AppState};
use crate::errors::{ApiResult, UserError};
use crate::types::{Session, SessionPatch};
use crate::utils::mask_credential;

/// `GET /admin/sessions` response.
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
}

/// Generic success body.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

/// `POST /admin/sessions` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSessionRequest {
    pub session_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// `POST /admin/test-session` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSessionRequest {
    pub session_id: String,
}

/// `POST /admin/test-session` response.
#[derive(Debug, Serialize)]
pub struct TestSessionResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn require_session_id(session_id: &str) -> ApiResult<&str> {
    if session_id.trim().is_empty() {
        return Err(UserError::params_invalid(
            "sessionId must be a non-empty string.",
            Some("sessionId"),
            None,
        ));
    }
    Ok(session_id)
}

/// List every session.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> ApiResult<Json<SessionsResponse>> {
    let sessions = with_pool(&state.pool, |pool| pool.all_sessions()).await?;
    Ok(Json(SessionsResponse { sessions }))
}

/// Validate a credential upstream, then add or reactivate it.
pub async fn add_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AddSessionRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(request) = payload?;
    let session_id = require_session_id(&request.session_id)?;

    let rejection = match state.validator.is_live(session_id).await {
        Ok(true) => None,
        Ok(false) => Some("upstream reports the credential is not live".to_string()),
        Err(e) => Some(e.to_string()),
    };
    if let Some(reason) = rejection {
        return Err(UserError::params_invalid(
            "Invalid session id.",
            Some("sessionId"),
            Some(&format!("{}: {}", mask_credential(session_id), reason)),
        ));
    }

    let id = session_id.to_string();
    let name = request.name.filter(|name| !name.is_empty());
    with_pool(&state.pool, move |pool| pool.add_session(&id, name.as_deref())).await??;

    Ok(SuccessResponse::ok())
}

/// Check a credential's liveness without adding it.
pub async fn test_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TestSessionRequest>, JsonRejection>,
) -> ApiResult<Json<TestSessionResponse>> {
    let Json(request) = payload?;
    if request.session_id.trim().is_empty() {
        return Ok(Json(TestSessionResponse {
            valid: false,
            error: Some("sessionId must be a non-empty string.".to_string()),
        }));
    }

    let response = match state.validator.is_live(&request.session_id).await {
        Ok(valid) => TestSessionResponse { valid, error: None },
        Err(e) => TestSessionResponse {
            valid: false,
            error: Some(e.to_string()),
        },
    };

    Ok(Json(response))
}

/// Rename and/or (de)activate a session.
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    payload: Result<Json<SessionPatch>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(patch) = payload?;
    if patch.is_empty() {
        return Err(UserError::params_invalid(
            "Nothing to update. Provide name and/or active.",
            None,
            None,
        ));
    }

    with_pool(&state.pool, move |pool| pool.update_session(&session_id, patch)).await??;
    Ok(SuccessResponse::ok())
}

/// Remove a session.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    with_pool(&state.pool, move |pool| pool.delete_session(&session_id)).await??;
    Ok(SuccessResponse::ok())
}
