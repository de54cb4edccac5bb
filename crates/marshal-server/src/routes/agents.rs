//! Agent roster and instruction overrides.

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};

use crate::error::AppError;
use crate::types::{AgentSummary, InstructionsUpdate};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_agents))
        .route("/:name", get(get_agent))
        .route("/:name/instructions", put(update_instructions))
}

fn summarize(state: &AppState, name: &str) -> Option<AgentSummary> {
    let registration = state.registry.get(name)?;
    let effective = state.registry.effective_instructions(name)?;
    Some(AgentSummary {
        name: registration.name.clone(),
        is_orchestrator: registration.is_orchestrator,
        tools: registration.tools.iter().map(|t| t.name.clone()).collect(),
        has_override: effective != registration.instructions,
    })
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentSummary>> {
    let summaries = state
        .registry
        .list()
        .iter()
        .filter_map(|a| summarize(&state, &a.name))
        .collect();
    Json(summaries)
}

async fn get_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let summary = summarize(&state, &name)
        .ok_or_else(|| AppError::NotFound(format!("Agent {} not found", name)))?;
    let instructions = state
        .registry
        .effective_instructions(&name)
        .unwrap_or_default();
    let mut body = serde_json::to_value(&summary)?;
    body["instructions"] = serde_json::Value::String(instructions);
    Ok(Json(body))
}

/// Set or clear the runtime instruction override for an agent. The
/// registered text is never modified; a null body restores it.
async fn update_instructions(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(update): Json<InstructionsUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.registry.get(&name).is_none() {
        return Err(AppError::NotFound(format!("Agent {} not found", name)));
    }
    match update.instructions {
        Some(instructions) => {
            if instructions.trim().is_empty() {
                return Err(AppError::BadRequest(
                    "instructions must not be empty; send null to reset".to_string(),
                ));
            }
            state.registry.set_override(&name, instructions);
        }
        None => {
            state.registry.reset_override(&name);
        }
    }
    let effective = state
        .registry
        .effective_instructions(&name)
        .unwrap_or_default();
    Ok(Json(serde_json::json!({
        "name": name,
        "instructions": effective,
    })))
}
