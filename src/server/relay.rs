// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Business-call plumbing: credential extraction, token checks, and the
//! pass-through relay to the upstream service.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{Json, Response};
use serde::{Deserialize, Serialize};

use super::{with_pool, AppState};
use crate::dispatch::select_credential;
use crate::errors::{ApiResult, UserError};
use crate::upstream::{RelayRequest, UpstreamError};

/// The upstream credential chosen for this request.
///
/// Taken from the caller's `Authorization` header when present, otherwise
/// from the session pool. Rejects with 503 when nothing is available.
#[derive(Debug, Clone)]
pub struct UpstreamCredential(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for UpstreamCredential {
    type Rejection = UserError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let authorization = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        with_pool(&state.pool, move |pool| {
            select_credential(pool, authorization.as_deref())
        })
        .await?
        .map(UpstreamCredential)
        .ok_or_else(UserError::no_session_available)
    }
}

/// `POST /token/check` body.
#[derive(Debug, Deserialize)]
pub struct TokenCheckRequest {
    pub token: String,
}

/// `POST /token/check` response.
#[derive(Debug, Serialize)]
pub struct TokenCheckResponse {
    pub live: bool,
}

/// Report whether the upstream currently accepts a credential.
pub async fn token_check(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TokenCheckRequest>, JsonRejection>,
) -> ApiResult<Json<TokenCheckResponse>> {
    let Json(request) = payload?;
    if request.token.trim().is_empty() {
        return Err(UserError::params_invalid(
            "token must be a non-empty string.",
            Some("token"),
            None,
        ));
    }

    let live = state
        .validator
        .is_live(&request.token)
        .await
        .map_err(|e| UserError::upstream(&e))?;

    Ok(Json(TokenCheckResponse { live }))
}

/// Forward the request upstream with a pooled credential and stream back the answer.
pub async fn relay_handler(
    State(state): State<Arc<AppState>>,
    UpstreamCredential(credential): UpstreamCredential,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    if !state.upstream.is_configured() {
        return Err(UserError::upstream(&UpstreamError::NotConfigured));
    }

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    let request = RelayRequest {
        method,
        path_and_query,
        content_type: headers.get(CONTENT_TYPE).cloned(),
        accept: headers.get(ACCEPT).cloned(),
        body,
    };

    let upstream = state
        .upstream
        .relay(&request, &credential)
        .await
        .map_err(|e| UserError::upstream(&e))?;

    let mut builder = Response::builder().status(upstream.status());
    if let Some(content_type) = upstream.headers().get(CONTENT_TYPE) {
        builder = builder.header(CONTENT_TYPE, content_type.clone());
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| {
            UserError::request_failed(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to build relay response.",
                Some(&e.to_string()),
            )
        })
}
