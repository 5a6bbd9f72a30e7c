//! HTTP API (axum)

pub mod conversations;
pub mod error;
pub mod sync;

use axum::{
    routing::{get, post},
    Router,
};

use crate::sync::SyncEngine;

pub use error::{ApiError, ApiResult, ErrorCode};

#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
}

impl AppState {
    pub fn new(engine: SyncEngine) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(sync::health))
        .route("/version/current", get(sync::current_version))
        .route("/version/check", get(sync::check_version))
        .route("/sync/:scope", get(sync::changes))
        .route("/sync/:scope/poll", get(sync::poll))
        .route("/conversations", post(conversations::create))
        .route(
            "/conversations/:id",
            get(conversations::get)
                .patch(conversations::update)
                .delete(conversations::delete),
        )
        .with_state(state)
}
