//! Message, tool, and request/response types for model invocation.

use serde::{Deserialize, Serialize};

use crate::agent::usage::UsageInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub content: String,
}

impl ModelMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Tool made available to a model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Tool call produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Output of a tool invocation the upstream ran on the model's behalf,
/// correlated to its call by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Structured request for more information from a specialist, surfaced to
/// the end user instead of a guess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationItem {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// One complete model invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDef>,
    /// Model identifier override (e.g. a fallback model).
    pub model: Option<String>,
}

impl ModelRequest {
    pub fn new(system: impl Into<String>, messages: Vec<ModelMessage>) -> Self {
        Self {
            system: system.into(),
            messages,
            tools: Vec::new(),
            model: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDef>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// Complete (non-streaming) model output.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub usage: UsageInfo,
}

/// Incremental part of a streaming model response.
#[derive(Debug, Clone)]
pub enum StreamPart {
    TextDelta { delta: String },
    ToolCall { call: ToolCall },
    Usage { usage: UsageInfo },
    Error { message: String },
}
