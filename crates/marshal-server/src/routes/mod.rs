//! API routes.

use axum::Router;

use crate::AppState;

mod agents;
mod chat;
mod conversations;

/// Build the API router with all endpoints.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/chat", chat::router())
        .nest("/agents", agents::router())
        .nest("/conversations", conversations::router())
}
