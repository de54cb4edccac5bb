//! Canonical event protocol for the orchestration engine.
//!
//! `AgentEvent` is the single source of truth for everything nested calls
//! emit while a request runs. Transport layers consume these events through
//! the protocol writer and map them to their wire format.
//!
//! The sink is deliberately fire-and-forget: emitting never fails and never
//! blocks, and events are dropped when no connection is listening (e.g. a
//! non-streaming request).

use serde::Serialize;
use tokio::sync::mpsc;

use super::types::Task;
use super::usage::UsageInfo;
use crate::ai::types::ClarificationItem;

/// Machine-readable activity code carried by `AgentEvent::Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusCode {
    Thinking,
    Planning,
    ExecutingTasks,
    Synthesizing,
    Retrying,
    Fallback,
}

/// Events emitted during request handling.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// First event on a streaming connection.
    SessionStart { conversation_id: String },

    /// Activity change (thinking, planning, executing-tasks, ...).
    Status { code: StatusCode },

    /// Partial response text.
    TextDelta { delta: String },

    /// A specialist invoked a tool.
    ToolCall {
        agent: String,
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Result of a tool invocation.
    ToolResult {
        agent: String,
        id: String,
        output: String,
        is_error: bool,
    },

    /// A specialist started working.
    AgentStart { agent: String },

    /// A specialist finished; `summary` is truncated for transport.
    AgentEnd { agent: String, summary: String },

    /// Delegation hop started.
    DelegateStart {
        from: String,
        to: String,
        query: String,
    },

    /// Delegation hop finished (or was rejected).
    DelegateEnd {
        from: String,
        to: String,
        ok: bool,
        summary: String,
    },

    /// A skill's behavioral text was injected into an agent's instructions.
    SkillInject {
        agent: String,
        skill: String,
        phase: String,
    },

    /// Specialists need more information before proceeding.
    AskUser { items: Vec<ClarificationItem> },

    /// Proposed task plan awaiting external approval.
    Plan { tasks: Vec<Task> },

    /// Terminal: request completed, with aggregated usage.
    Done { usage: UsageInfo },

    /// Terminal: request was cancelled.
    Cancelled,

    /// Terminal: unhandled failure.
    Error { error: String },
}

impl AgentEvent {
    /// Terminal events end the stream; exactly one is delivered per
    /// connection and nothing follows it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::Done { .. } | AgentEvent::Cancelled | AgentEvent::Error { .. }
        )
    }
}

/// Cloneable handle for publishing events out of nested calls.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish an event. Send errors mean the listener went away; the
    /// producing side keeps running regardless.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(AgentEvent::Done {
            usage: UsageInfo::default()
        }
        .is_terminal());
        assert!(AgentEvent::Cancelled.is_terminal());
        assert!(AgentEvent::Error {
            error: "x".to_string()
        }
        .is_terminal());
        assert!(!AgentEvent::Status {
            code: StatusCode::Planning
        }
        .is_terminal());
    }

    #[test]
    fn status_codes_serialize_kebab_case() {
        let json = serde_json::to_value(AgentEvent::Status {
            code: StatusCode::ExecutingTasks,
        })
        .unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["code"], "executing-tasks");
    }

    #[test]
    fn emit_without_listener_is_harmless() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(AgentEvent::Cancelled);
    }
}
