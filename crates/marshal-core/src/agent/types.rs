//! Task and result shapes shared by the orchestrator and the executor.

use serde::{Deserialize, Serialize};

use super::usage::UsageInfo;
use crate::ai::types::ClarificationItem;
use crate::storage::skills::Skill;

/// One unit of delegated work, created by the orchestrator when it decides
/// to fan out and consumed exactly once by the task executor. Also the
/// wire shape of an externally approved plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub agent: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
}

/// What a specialist produced for a single task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    pub text: String,
    #[serde(default)]
    pub clarification_items: Vec<ClarificationItem>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub usage: UsageInfo,
}

/// Outcome of one executed task. Never mutated after creation; delegation
/// policy violations and upstream failures land in `error` instead of
/// being thrown, so a batch of tasks fails independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub agent: String,
    pub query: String,
    pub response: AgentResponse,
    /// Response-phase skills gathered from this task for synthesis.
    #[serde(default)]
    pub response_skills: Vec<Skill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the failure was a cancellation rather than an error.
    #[serde(default)]
    pub cancelled: bool,
}

impl TaskResult {
    pub fn success(agent: impl Into<String>, query: impl Into<String>, response: AgentResponse) -> Self {
        Self {
            agent: agent.into(),
            query: query.into(),
            response,
            response_skills: Vec::new(),
            error: None,
            cancelled: false,
        }
    }

    pub fn failure(
        agent: impl Into<String>,
        query: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            query: query.into(),
            response: AgentResponse::default(),
            response_skills: Vec::new(),
            error: Some(error.into()),
            cancelled: false,
        }
    }

    pub fn cancelled(agent: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            query: query.into(),
            response: AgentResponse::default(),
            response_skills: Vec::new(),
            error: Some("cancelled".to_string()),
            cancelled: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
