//! Request/response types for the HTTP API.

use serde::{Deserialize, Serialize};

use marshal_core::agent::types::Task;
use marshal_core::ai::types::ClarificationItem;
use marshal_core::UsageInfo;

/// Body for `POST /api/chat` and `POST /api/chat/complete`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Existing conversation to continue; a new one is created if absent.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Model identifier override for the supervisor's own calls.
    #[serde(default)]
    pub model: Option<String>,
    /// Memory keys to load into planning context.
    #[serde(default)]
    pub memory_keys: Vec<String>,
    /// Execute multi-task plans without approval.
    #[serde(default)]
    pub autonomous: bool,
    /// Always return the plan for approval instead of executing it.
    #[serde(default)]
    pub plan_mode: bool,
    /// Approved plan from a previous awaiting-approval response.
    #[serde(default)]
    pub approved_plan: Option<Vec<Task>>,
}

/// Clarification block in a non-streaming response.
#[derive(Debug, Clone, Serialize)]
pub struct ClarificationBody {
    pub agent: String,
    pub items: Vec<ClarificationItem>,
}

/// Body for `POST /api/chat/complete` responses.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ChatResponse {
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
    /// Plan awaiting approval; resubmit it as `approved_plan` to execute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_plan: Option<Vec<Task>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<ClarificationBody>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Agent listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub is_orchestrator: bool,
    pub tools: Vec<String>,
    /// Whether a runtime instruction override is active.
    pub has_override: bool,
}

/// Body for `PUT /api/agents/:name/instructions`. A null `instructions`
/// clears the override and restores the registered text.
#[derive(Debug, Clone, Deserialize)]
pub struct InstructionsUpdate {
    #[serde(default)]
    pub instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_defaults_apply() {
        let req: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(req.message, "hi");
        assert!(req.conversation_id.is_none());
        assert!(req.memory_keys.is_empty());
        assert!(!req.autonomous);
        assert!(!req.plan_mode);
        assert!(req.approved_plan.is_none());
    }

    #[test]
    fn chat_response_omits_empty_fields() {
        let body = ChatResponse {
            conversation_id: "c1".to_string(),
            response: Some("hello".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response"], "hello");
        assert!(json.get("error").is_none());
        assert!(json.get("cancelled").is_none());
        assert!(json.get("pending_plan").is_none());
    }

    #[test]
    fn approved_plan_round_trips() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"message": "go", "approved_plan": [{"agent": "research", "query": "q"}]}"#,
        )
        .unwrap();
        let plan = req.approved_plan.unwrap();
        assert_eq!(plan[0].agent, "research");
        assert!(plan[0].skills.is_none());
    }
}
