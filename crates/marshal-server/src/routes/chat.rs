//! Chat endpoints: SSE streaming, non-streaming completion, cancellation.
//!
//! The streaming endpoint wires the engine's event channel through the
//! protocol writer onto an SSE connection. One run per conversation at a
//! time; a second request while one is in flight gets 409.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use dashmap::DashMap;
use futures::stream::Stream;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use marshal_core::agent::compactor::compact_if_needed;
use marshal_core::agent::protocol::{pump, WireEvent};
use marshal_core::ai::types::{ModelMessage, Role};
use marshal_core::storage::StoredMessage;
use marshal_core::{AgentEvent, DelegationContext, EventSink, Outcome, SupervisorRequest};

use crate::error::AppError;
use crate::types::{ChatRequest, ChatResponse, ClarificationBody};
use crate::AppState;

const TITLE_MAX_CHARS: usize = 60;
const MEMORY_NAMESPACE: &str = "user";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(chat))
        .route("/complete", post(chat_complete))
        .route("/:conversation_id/cancel", post(cancel))
}

struct ChatSession {
    conversation_id: String,
    history: Vec<ModelMessage>,
    memory_context: Vec<String>,
    guard: OwnedMutexGuard<()>,
}

/// Owns a conversation's entry in the active-request registry. Dropping it
/// removes the entry and fires the token, so an abandoned handler future
/// (client gone before completion) neither leaks the entry nor leaves the
/// engine running.
struct ActiveRequestGuard {
    active: Arc<DashMap<String, CancellationToken>>,
    conversation_id: String,
}

impl ActiveRequestGuard {
    fn register(
        active: &Arc<DashMap<String, CancellationToken>>,
        conversation_id: &str,
        token: CancellationToken,
    ) -> Self {
        active.insert(conversation_id.to_string(), token);
        Self {
            active: Arc::clone(active),
            conversation_id: conversation_id.to_string(),
        }
    }
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        if let Some((_, token)) = self.active.remove(&self.conversation_id) {
            token.cancel();
        }
    }
}

/// Resolve the conversation, take its busy lock, compact and load history,
/// and persist the inbound user message.
async fn setup_session(state: &AppState, request: &ChatRequest) -> Result<ChatSession, AppError> {
    let conversation_id = match &request.conversation_id {
        Some(id) => {
            if state.conversations.get(id).await?.is_none() {
                return Err(AppError::NotFound(format!("Conversation {} not found", id)));
            }
            id.clone()
        }
        None => {
            state
                .conversations
                .create(&derive_title(&request.message))
                .await?
        }
    };

    let lock = state
        .conversation_locks
        .entry(conversation_id.clone())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    let guard = lock.try_lock_owned().map_err(|_| {
        AppError::Conflict(format!("Conversation {} is busy", conversation_id))
    })?;

    // Fold older turns before loading. A failed summary call only logs;
    // the request proceeds on the unfolded history.
    if let Err(e) = compact_if_needed(
        state.conversations.as_ref(),
        state.model.as_ref(),
        &conversation_id,
        &state.compaction,
        &CancellationToken::new(),
    )
    .await
    {
        tracing::warn!("compaction failed for {}: {:?}", conversation_id, e);
    }

    let stored = state
        .conversations
        .get(&conversation_id)
        .await?
        .map(|c| c.messages)
        .unwrap_or_default();
    let history = history_messages(&stored);

    let mut memory_context = Vec::new();
    for key in &request.memory_keys {
        match state.memory.get(MEMORY_NAMESPACE, key).await {
            Ok(Some(value)) => memory_context.push(value),
            Ok(None) => {}
            Err(e) => tracing::warn!("memory lookup '{}' failed: {:?}", key, e),
        }
    }

    state
        .conversations
        .append(
            &conversation_id,
            StoredMessage::new(Role::User, request.message.clone()),
        )
        .await?;

    Ok(ChatSession {
        conversation_id,
        history,
        memory_context,
        guard,
    })
}

fn supervisor_request(request: &ChatRequest, session: &ChatSession) -> SupervisorRequest {
    SupervisorRequest {
        message: request.message.clone(),
        history: session.history.clone(),
        model: request.model.clone(),
        autonomous: request.autonomous,
        plan_mode: request.plan_mode,
        approved_plan: request.approved_plan.clone(),
        memory_context: session.memory_context.clone(),
    }
}

/// Streaming chat: events arrive as SSE, each stamped with a sequence id.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let session = setup_session(&state, &request).await?;
    let conversation_id = session.conversation_id.clone();
    let engine_request = supervisor_request(&request, &session);

    let cancel = CancellationToken::new();
    let request_guard =
        ActiveRequestGuard::register(&state.active_requests, &conversation_id, cancel.clone());

    let (sink, engine_rx) = EventSink::channel();
    let (wire_tx, wire_rx) = mpsc::unbounded_channel();
    // The pump fires the token when the SSE consumer disconnects.
    tokio::spawn(pump(engine_rx, wire_tx, cancel.clone()));

    let supervisor = Arc::clone(&state.supervisor);
    let conversations = Arc::clone(&state.conversations);
    tokio::spawn(async move {
        // Busy lock and registry entry held for the whole run.
        let _guard = session.guard;
        let _request_guard = request_guard;

        sink.emit(AgentEvent::SessionStart {
            conversation_id: conversation_id.clone(),
        });
        let ctx = DelegationContext::root(
            supervisor.name().to_string(),
            cancel.clone(),
            Some(sink.clone()),
        );
        let outcome = ctx.scope(supervisor.handle(engine_request)).await;

        if let Some(text) = outcome.answer_text() {
            if !text.is_empty() {
                if let Err(e) = conversations
                    .append(&conversation_id, StoredMessage::new(Role::Assistant, text))
                    .await
                {
                    tracing::warn!("failed to persist reply for {}: {:?}", conversation_id, e);
                }
            }
        }
        for event in outcome.closing_events() {
            sink.emit(event);
        }
    });

    let stream = UnboundedReceiverStream::new(wire_rx).map(|wire: WireEvent| {
        Ok(match Event::default().json_data(&wire) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("event serialization failed: {}", e);
                Event::default().event("error").data("serialization failed")
            }
        })
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Non-streaming chat: runs the request to completion and returns the
/// terminal outcome as one JSON body.
async fn chat_complete(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let session = setup_session(&state, &request).await?;
    let conversation_id = session.conversation_id.clone();
    let engine_request = supervisor_request(&request, &session);
    let _guard = session.guard;

    let cancel = CancellationToken::new();
    // Guard, not manual removal: axum drops this future if the client
    // disconnects, and the entry must not outlive the handler.
    let _request_guard =
        ActiveRequestGuard::register(&state.active_requests, &conversation_id, cancel.clone());

    let ctx = DelegationContext::root(state.supervisor.name().to_string(), cancel, None);
    let outcome = ctx.scope(state.supervisor.handle(engine_request)).await;

    if let Some(text) = outcome.answer_text() {
        if !text.is_empty() {
            if let Err(e) = state
                .conversations
                .append(&conversation_id, StoredMessage::new(Role::Assistant, text))
                .await
            {
                tracing::warn!("failed to persist reply for {}: {:?}", conversation_id, e);
            }
        }
    }

    Ok(Json(outcome_to_response(conversation_id, outcome)))
}

/// Cancel an in-flight request for a conversation.
async fn cancel(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    match state.active_requests.get(&conversation_id) {
        Some(token) => {
            token.cancel();
            Ok(Json(serde_json::json!({"cancelled": true})))
        }
        None => Err(AppError::NotFound(format!(
            "No active request for conversation {}",
            conversation_id
        ))),
    }
}

/// Conversation title derived from the first message.
fn derive_title(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return "New conversation".to_string();
    }
    first_line.chars().take(TITLE_MAX_CHARS).collect()
}

/// Stored history as model messages. Compaction summaries become system
/// messages so the model reads them as context, not dialogue.
fn history_messages(stored: &[StoredMessage]) -> Vec<ModelMessage> {
    stored
        .iter()
        .map(|m| {
            if m.is_summary() {
                ModelMessage::system(format!("Summary of earlier conversation:\n{}", m.content))
            } else {
                ModelMessage {
                    role: m.role,
                    content: m.content.clone(),
                }
            }
        })
        .collect()
}

fn outcome_to_response(conversation_id: String, outcome: Outcome) -> ChatResponse {
    let tools_used = outcome.tools_used();
    let mut body = ChatResponse {
        conversation_id,
        tools_used,
        ..Default::default()
    };
    match outcome {
        Outcome::Direct { text, usage } => {
            body.response = Some(text);
            body.usage = Some(usage);
        }
        Outcome::Routed { result, usage } => {
            body.response = Some(result.response.text);
            body.usage = Some(usage);
        }
        Outcome::Synthesized { text, usage, .. } => {
            body.response = Some(text);
            body.usage = Some(usage);
        }
        Outcome::AwaitingApproval { tasks, usage } => {
            body.pending_plan = Some(tasks);
            body.usage = Some(usage);
        }
        Outcome::AwaitingClarification {
            agent,
            items,
            usage,
        } => {
            body.clarification = Some(ClarificationBody { agent, items });
            body.usage = Some(usage);
        }
        Outcome::Cancelled => body.cancelled = true,
        Outcome::Error { message } => body.error = Some(message),
    }
    body
}
