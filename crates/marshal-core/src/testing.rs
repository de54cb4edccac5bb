//! Shared test doubles.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::usage::UsageInfo;
use crate::ai::client::ModelClient;
use crate::ai::error::UpstreamError;
use crate::ai::types::{ModelOutput, ModelRequest, ToolCall};

/// Scripted model: pops one queued result per invocation. When the script
/// runs dry it echoes the last user message so open-ended tests still get
/// a sensible answer.
pub struct MockModel {
    script: Mutex<VecDeque<Result<ModelOutput, UpstreamError>>>,
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl MockModel {
    pub fn new(script: impl IntoIterator<Item = Result<ModelOutput, UpstreamError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new([])
    }

    pub fn text_output(text: impl Into<String>) -> ModelOutput {
        ModelOutput {
            text: text.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            usage: UsageInfo::new(10, 5).with_duration_ms(50),
        }
    }

    pub fn tool_output(calls: Vec<ToolCall>) -> ModelOutput {
        ModelOutput {
            text: String::new(),
            tool_calls: calls,
            tool_results: Vec::new(),
            usage: UsageInfo::new(10, 5).with_duration_ms(50),
        }
    }

    pub fn tool_call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("call-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            arguments,
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn invoke(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelOutput, UpstreamError> {
        if cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }
        let scripted = self.script.lock().pop_front();
        self.requests.lock().push(request.clone());
        match scripted {
            Some(result) => result,
            None => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| matches!(m.role, crate::ai::types::Role::User))
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                Ok(Self::text_output(format!("echo: {last_user}")))
            }
        }
    }
}
