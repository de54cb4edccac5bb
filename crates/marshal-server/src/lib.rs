//! Marshal Server
//!
//! HTTP/SSE layer over the orchestration engine. This is a library crate:
//! the host constructs an [`AppState`] with its own model client and
//! stores, then calls `start_server()`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use marshal_core::agent::compactor::CompactionConfig;
use marshal_core::ai::client::ModelClient;
use marshal_core::storage::{ConversationStore, MemoryStore};
use marshal_core::{AgentRegistry, Supervisor};

pub mod error;
pub mod routes;
pub mod types;

/// Configuration for starting the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on (default: 3000).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub registry: Arc<AgentRegistry>,
    pub model: Arc<dyn ModelClient>,
    pub conversations: Arc<dyn ConversationStore>,
    pub memory: Arc<dyn MemoryStore>,
    /// Cancellation token per in-flight request, keyed by conversation id.
    pub active_requests: Arc<DashMap<String, CancellationToken>>,
    /// Per-conversation locks to prevent concurrent runs on the same
    /// conversation.
    pub conversation_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    pub compaction: CompactionConfig,
}

impl AppState {
    pub fn new(
        supervisor: Arc<Supervisor>,
        registry: Arc<AgentRegistry>,
        model: Arc<dyn ModelClient>,
        conversations: Arc<dyn ConversationStore>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            supervisor,
            registry,
            model,
            conversations,
            memory,
            active_requests: Arc::new(DashMap::new()),
            conversation_locks: Arc::new(DashMap::new()),
            compaction: CompactionConfig::default(),
        }
    }

    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }
}

/// Install the default tracing subscriber. Respects `RUST_LOG`; defaults
/// to info for the marshal crates.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,marshal_core=info,marshal_server=info")),
        )
        .init();
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .nest("/api", routes::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn start_server(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
