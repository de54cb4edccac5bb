//! Conversation management endpoints.

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};

use marshal_core::storage::{Conversation, ConversationSummary};

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_conversations))
        .route("/:id", get(get_conversation))
        .route("/:id", delete(delete_conversation))
        .route("/:id/clear", post(clear_conversation))
}

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    Ok(Json(state.conversations.list().await?))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, AppError> {
    state
        .conversations
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", id)))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    // A run in flight keeps its token; cancel it so the worker winds down.
    if let Some((_, token)) = state.active_requests.remove(&id) {
        token.cancel();
    }
    state.conversation_locks.remove(&id);
    if state.conversations.delete(&id).await? {
        Ok(Json(serde_json::json!({"deleted": true})))
    } else {
        Err(AppError::NotFound(format!("Conversation {} not found", id)))
    }
}

async fn clear_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.conversations.clear(&id).await? {
        Ok(Json(serde_json::json!({"cleared": true})))
    } else {
        Err(AppError::NotFound(format!("Conversation {} not found", id)))
    }
}
