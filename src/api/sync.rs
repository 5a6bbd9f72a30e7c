//! Sync and version endpoints
//!
//! - GET /sync/:scope?since=V
//! - GET /sync/:scope/poll?since=V&timeout=S
//! - GET /version/current
//! - GET /version/check?since=V
//! - GET /health

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{ApiError, ApiResult, ErrorCode};
use super::AppState;
use crate::sync::SyncResult;

// ============================================================================
// TYPES
// ============================================================================

// Raw strings so a malformed cursor reaches the handler and gets a resync
// response instead of the extractor's plain-text rejection.

#[derive(Debug, Deserialize)]
pub struct SinceParams {
    #[serde(default)]
    pub since: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PollParams {
    #[serde(default)]
    pub since: Option<String>,
    /// Seconds; clamped to the configured maximum
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionCheckResponse {
    pub version: u64,
    pub has_changes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: u64,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Missing or empty means 0. Anything else must be a non-negative integer.
async fn parse_cursor(state: &AppState, raw: Option<&str>) -> ApiResult<u64> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(0),
        Some(raw) => raw,
    };
    match raw.parse::<u64>() {
        Ok(since) => Ok(since),
        Err(_) => {
            let current = state.engine.current_version().await?;
            Err(ApiError::unreadable_cursor(raw, current))
        }
    }
}

fn parse_timeout(raw: Option<&str>) -> ApiResult<Option<Duration>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<u64>().map(|s| Some(Duration::from_secs(s))).map_err(|_| {
            ApiError::new(
                ErrorCode::InvalidInput,
                format!("timeout must be a whole number of seconds, got '{}'", raw),
            )
        }),
    }
}

pub async fn changes(
    State(state): State<AppState>,
    Path(scope): Path<String>,
    Query(params): Query<SinceParams>,
) -> ApiResult<Json<SyncResult>> {
    let since = parse_cursor(&state, params.since.as_deref()).await?;
    let result = state.engine.changes_since(&scope, since).await?;
    Ok(Json(result))
}

pub async fn poll(
    State(state): State<AppState>,
    Path(scope): Path<String>,
    Query(params): Query<PollParams>,
) -> ApiResult<Json<SyncResult>> {
    let since = parse_cursor(&state, params.since.as_deref()).await?;
    let timeout = parse_timeout(params.timeout.as_deref())?;
    let result = state.engine.wait_for_changes(&scope, since, timeout).await?;
    Ok(Json(result))
}

pub async fn current_version(State(state): State<AppState>) -> ApiResult<Json<VersionResponse>> {
    let version = state.engine.current_version().await?;
    Ok(Json(VersionResponse { version }))
}

/// Cheap global check; says nothing about which scope changed
pub async fn check_version(
    State(state): State<AppState>,
    Query(params): Query<SinceParams>,
) -> ApiResult<Json<VersionCheckResponse>> {
    let since = parse_cursor(&state, params.since.as_deref()).await?;
    let version = state.engine.current_version().await?;
    Ok(Json(VersionCheckResponse {
        version,
        has_changes: version > since,
    }))
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let version = state.engine.current_version().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version,
    }))
}
