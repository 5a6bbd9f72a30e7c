//! Conversation write surface
//!
//! Stand-in for the CRUD/webhook layer: every handler goes through the store
//! write path, so each change is ticked and logged before it is acknowledged.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::model::{ConversationPatch, ConversationRecord, DeleteLogEntry, NewConversation};

pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<NewConversation>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .engine
        .run_blocking(move |store| store.create_conversation(input))
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ConversationRecord>> {
    state
        .engine
        .run_blocking(move |store| store.get_conversation(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(id))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ConversationPatch>,
) -> ApiResult<Json<ConversationRecord>> {
    let record = state
        .engine
        .run_blocking(move |store| store.update_conversation(id, &patch))
        .await?;
    Ok(Json(record))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeleteLogEntry>> {
    let tombstone = state
        .engine
        .run_blocking(move |store| store.delete_conversation(id))
        .await?;
    Ok(Json(tombstone))
}
