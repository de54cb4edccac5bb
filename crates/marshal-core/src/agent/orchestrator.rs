//! Supervisor — the top-level decision engine.
//!
//! One request flows through up to three stages: a planning call where the
//! model may route to a single specialist or declare parallel tasks, an
//! execution stage that runs the chosen plan with per-branch isolation,
//! and a synthesis call that merges task results into one answer. If the
//! planning call uses neither advisory tool, its direct text is the final
//! answer and no delegation happens.
//!
//! Exactly one terminal outcome is produced per request: direct answer,
//! routed answer, synthesized answer, awaiting-approval, awaiting-
//! clarification, cancelled, or error.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::context::DelegationContext;
use super::events::{AgentEvent, StatusCode};
use super::executor::TaskExecutor;
use super::registry::AgentRegistry;
use super::retry::{with_resilience, FallbackFn, RetryConfig};
use super::types::{Task, TaskResult};
use super::usage::UsageInfo;
use crate::ai::client::ModelClient;
use crate::ai::error::UpstreamError;
use crate::ai::types::{ClarificationItem, ModelMessage, ModelRequest, StreamPart, ToolDef};

/// Advisory planning tool: hand the whole request to one specialist.
pub const ROUTE_TOOL: &str = "route_to_agent";

/// Advisory planning tool: declare one independent sub-task.
pub const TASK_TOOL: &str = "create_task";

const PLANNING_GUIDANCE: &str = "\n\nDecide how to handle the request:\n\
- If one specialist can handle it end to end, call `route_to_agent` once.\n\
- If it splits into independent parts, call `create_task` once per part; \
tasks run concurrently and must not depend on each other.\n\
- If no specialist is needed, answer directly in plain text and call no tool.";

const SYNTHESIS_INSTRUCTIONS: &str = "You are combining results from specialist agents into one \
answer. Address the original request directly, reconcile overlaps, and briefly note any source \
that failed. Do not mention the orchestration machinery.";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Name the supervisor appears under in delegation chains.
    pub name: String,
    /// Planning instructions used when the registry has no registration
    /// for the supervisor itself.
    pub instructions: String,
    pub retry: RetryConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "supervisor".to_string(),
            instructions: "You are a supervisor coordinating specialist agents.".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// One inbound request, already resolved to history by the caller.
#[derive(Debug, Clone, Default)]
pub struct SupervisorRequest {
    pub message: String,
    pub history: Vec<ModelMessage>,
    /// Model identifier override for the supervisor's own calls.
    pub model: Option<String>,
    /// Execute a multi-task plan without external approval.
    pub autonomous: bool,
    /// Force returning the plan for approval even in autonomous mode.
    pub plan_mode: bool,
    /// Previously approved plan; skips planning and executes directly.
    pub approved_plan: Option<Vec<Task>>,
    /// Memory values loaded by the caller, prepended to planning context.
    pub memory_context: Vec<String>,
}

/// Terminal outcome of one request.
#[derive(Debug, Clone)]
pub enum Outcome {
    Direct {
        text: String,
        usage: UsageInfo,
    },
    Routed {
        result: TaskResult,
        usage: UsageInfo,
    },
    Synthesized {
        text: String,
        results: Vec<TaskResult>,
        usage: UsageInfo,
    },
    AwaitingApproval {
        tasks: Vec<Task>,
        usage: UsageInfo,
    },
    AwaitingClarification {
        agent: String,
        items: Vec<ClarificationItem>,
        usage: UsageInfo,
    },
    Cancelled,
    Error {
        message: String,
    },
}

impl Outcome {
    pub fn usage(&self) -> Option<&UsageInfo> {
        match self {
            Outcome::Direct { usage, .. }
            | Outcome::Routed { usage, .. }
            | Outcome::Synthesized { usage, .. }
            | Outcome::AwaitingApproval { usage, .. }
            | Outcome::AwaitingClarification { usage, .. } => Some(usage),
            Outcome::Cancelled | Outcome::Error { .. } => None,
        }
    }

    pub fn answer_text(&self) -> Option<&str> {
        match self {
            Outcome::Direct { text, .. } | Outcome::Synthesized { text, .. } => Some(text),
            Outcome::Routed { result, .. } => Some(&result.response.text),
            _ => None,
        }
    }

    /// Tool names used across every executed branch.
    pub fn tools_used(&self) -> Vec<String> {
        match self {
            Outcome::Routed { result, .. } => result.response.tools_used.clone(),
            Outcome::Synthesized { results, .. } => {
                let mut seen = HashSet::new();
                results
                    .iter()
                    .flat_map(|r| r.response.tools_used.iter().cloned())
                    .filter(|name| seen.insert(name.clone()))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// Events that close a streaming connection for this outcome. Exactly
    /// one terminal event, always last.
    pub fn closing_events(&self) -> Vec<AgentEvent> {
        match self {
            Outcome::Direct { usage, .. }
            | Outcome::Routed { usage, .. }
            | Outcome::Synthesized { usage, .. } => vec![AgentEvent::Done {
                usage: usage.clone(),
            }],
            Outcome::AwaitingApproval { tasks, usage } => vec![
                AgentEvent::Plan {
                    tasks: tasks.clone(),
                },
                AgentEvent::Done {
                    usage: usage.clone(),
                },
            ],
            Outcome::AwaitingClarification { items, usage, .. } => vec![
                AgentEvent::AskUser {
                    items: items.clone(),
                },
                AgentEvent::Done {
                    usage: usage.clone(),
                },
            ],
            Outcome::Cancelled => vec![AgentEvent::Cancelled],
            Outcome::Error { message } => vec![AgentEvent::Error {
                error: message.clone(),
            }],
        }
    }
}

pub struct Supervisor {
    registry: Arc<AgentRegistry>,
    model: Arc<dyn ModelClient>,
    executor: TaskExecutor,
    fallback: Option<Arc<FallbackFn>>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        model: Arc<dyn ModelClient>,
        executor: TaskExecutor,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            model,
            executor,
            fallback: None,
            config,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<FallbackFn>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Handle one request to a terminal outcome. Must run inside a
    /// delegation scope to stream events; outside one it still works but
    /// emits nothing.
    pub async fn handle(&self, request: SupervisorRequest) -> Outcome {
        let ctx = DelegationContext::current().unwrap_or_else(|| {
            DelegationContext::root(self.config.name.clone(), CancellationToken::new(), None)
        });
        let mut stage_usage: Vec<UsageInfo> = Vec::new();

        ctx.emit(AgentEvent::Status {
            code: StatusCode::Thinking,
        });

        let tasks = match &request.approved_plan {
            // A pre-approved plan skips planning entirely.
            Some(plan) => plan.clone(),
            None => {
                ctx.emit(AgentEvent::Status {
                    code: StatusCode::Planning,
                });
                let planning = match self.plan(&request, &ctx).await {
                    Ok(output) => output,
                    Err(err) if err.is_cancelled() => return Outcome::Cancelled,
                    Err(err) => {
                        return Outcome::Error {
                            message: format!("planning failed: {}", err.message()),
                        }
                    }
                };
                stage_usage.push(planning.usage.clone());

                let (routes, declared) = split_plan_calls(&planning.tool_calls);

                if let Some(route) = routes.into_iter().next() {
                    if !declared.is_empty() {
                        // Precedence: routing wins over task declarations in
                        // the same response.
                        warn!(
                            dropped_tasks = declared.len(),
                            "planning response contained both route and tasks; routing wins"
                        );
                    }
                    return self.run_route(route, &request, &ctx, stage_usage).await;
                }

                if declared.is_empty() {
                    // Neither advisory tool used: the model's text is the
                    // final answer.
                    let text = planning.text;
                    ctx.emit(AgentEvent::TextDelta {
                        delta: text.clone(),
                    });
                    return Outcome::Direct {
                        text,
                        usage: UsageInfo::merge_all(&stage_usage),
                    };
                }

                if !request.autonomous || request.plan_mode {
                    return Outcome::AwaitingApproval {
                        tasks: declared,
                        usage: UsageInfo::merge_all(&stage_usage),
                    };
                }
                declared
            }
        };

        ctx.emit(AgentEvent::Status {
            code: StatusCode::ExecutingTasks,
        });
        let results = self.execute_tasks(&tasks, &ctx).await;
        if ctx.is_cancelled() || results.iter().any(|r| r.cancelled) {
            return Outcome::Cancelled;
        }
        for result in &results {
            stage_usage.push(result.response.usage.clone());
        }

        ctx.emit(AgentEvent::Status {
            code: StatusCode::Synthesizing,
        });
        match self.synthesize(&request, &results, &ctx).await {
            Ok((text, usage)) => {
                stage_usage.push(usage);
                Outcome::Synthesized {
                    text,
                    results,
                    usage: UsageInfo::merge_all(&stage_usage),
                }
            }
            Err(err) if err.is_cancelled() => Outcome::Cancelled,
            Err(err) => Outcome::Error {
                message: format!("synthesis failed: {}", err.message()),
            },
        }
    }

    /// Planning call: history + message against the supervisor's
    /// instructions, agent roster, and the two advisory tools.
    async fn plan(
        &self,
        request: &SupervisorRequest,
        ctx: &DelegationContext,
    ) -> Result<crate::ai::types::ModelOutput, UpstreamError> {
        let mut system = self
            .registry
            .effective_instructions(&self.config.name)
            .unwrap_or_else(|| self.config.instructions.clone());

        let roster: Vec<String> = self
            .registry
            .list()
            .iter()
            .filter(|a| !a.is_orchestrator)
            .map(|a| format!("- {}: {}", a.name, first_line(&a.instructions)))
            .collect();
        if !roster.is_empty() {
            system.push_str("\n\nAvailable specialists:\n");
            system.push_str(&roster.join("\n"));
        }
        for memory in &request.memory_context {
            system.push_str("\n\nRelevant memory:\n");
            system.push_str(memory);
        }
        system.push_str(PLANNING_GUIDANCE);

        let mut messages = request.history.clone();
        messages.push(ModelMessage::user(request.message.clone()));
        let base_request = ModelRequest::new(system, messages)
            .with_tools(vec![route_tool_def(), task_tool_def()])
            .with_model(request.model.clone());

        let model = Arc::clone(&self.model);
        let cancel = ctx.cancellation().clone();
        with_resilience(
            move |model_override| {
                let mut req = base_request.clone();
                if model_override.is_some() {
                    req.model = model_override;
                }
                let model = Arc::clone(&model);
                let cancel = cancel.clone();
                async move { model.invoke(req, &cancel).await }
            },
            &self.config.retry,
            self.fallback.as_deref(),
            ctx.cancellation(),
        )
        .await
    }

    async fn run_route(
        &self,
        route: Task,
        request: &SupervisorRequest,
        ctx: &DelegationContext,
        mut stage_usage: Vec<UsageInfo>,
    ) -> Outcome {
        ctx.emit(AgentEvent::Status {
            code: StatusCode::ExecutingTasks,
        });
        let result = self
            .executor
            .execute_task(&route.agent, &route.query, route.skills.as_deref())
            .await;
        if result.cancelled || ctx.is_cancelled() {
            return Outcome::Cancelled;
        }
        stage_usage.push(result.response.usage.clone());

        // Clarifications from a routed call override everything in
        // non-autonomous mode: halt and surface them to the caller.
        if !request.autonomous && !result.response.clarification_items.is_empty() {
            return Outcome::AwaitingClarification {
                agent: result.agent,
                items: result.response.clarification_items,
                usage: UsageInfo::merge_all(&stage_usage),
            };
        }

        if let Some(error) = &result.error {
            return Outcome::Error {
                message: format!("route to '{}' failed: {}", result.agent, error),
            };
        }

        ctx.emit(AgentEvent::TextDelta {
            delta: result.response.text.clone(),
        });
        Outcome::Routed {
            result,
            usage: UsageInfo::merge_all(&stage_usage),
        }
    }

    /// Run all declared tasks concurrently. One task's failure (or panic)
    /// becomes an error result for that branch; siblings are unaffected.
    async fn execute_tasks(&self, tasks: &[Task], ctx: &DelegationContext) -> Vec<TaskResult> {
        let mut set = JoinSet::new();
        for (idx, task) in tasks.iter().cloned().enumerate() {
            let executor = self.executor.clone();
            let ctx = ctx.clone();
            set.spawn(async move {
                let result = ctx
                    .scope(async {
                        executor
                            .execute_task(&task.agent, &task.query, task.skills.as_deref())
                            .await
                    })
                    .await;
                (idx, result)
            });
        }

        let mut slots: Vec<Option<TaskResult>> = vec![None; tasks.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!("task join failed: {}", e),
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    TaskResult::failure(
                        tasks[idx].agent.clone(),
                        tasks[idx].query.clone(),
                        "task aborted unexpectedly",
                    )
                })
            })
            .collect()
    }

    /// Synthesis call: combine labeled task results into one answer,
    /// streaming text deltas to the sink as they arrive.
    async fn synthesize(
        &self,
        request: &SupervisorRequest,
        results: &[TaskResult],
        ctx: &DelegationContext,
    ) -> Result<(String, UsageInfo), UpstreamError> {
        let mut system = SYNTHESIS_INSTRUCTIONS.to_string();
        let mut injected = HashSet::new();
        for result in results {
            for skill in &result.response_skills {
                if skill.phase.applies_to_response() && injected.insert(skill.name.clone()) {
                    ctx.emit(AgentEvent::SkillInject {
                        agent: self.config.name.clone(),
                        skill: skill.name.clone(),
                        phase: skill.phase.as_str().to_string(),
                    });
                    system.push_str("\n\n");
                    system.push_str(&skill.content);
                }
            }
        }

        let mut prompt = format!("Original request:\n{}\n\nSources:\n\n", request.message);
        for result in results {
            match &result.error {
                Some(error) => {
                    prompt.push_str(&format!(
                        "### {} (failed)\nThis task failed: {}\n\n",
                        result.agent, error
                    ));
                }
                None => {
                    prompt.push_str(&format!(
                        "### {} — {}\n{}\n\n",
                        result.agent, result.query, result.response.text
                    ));
                    for item in &result.response.clarification_items {
                        prompt.push_str(&format!("(open question: {})\n", item.question));
                    }
                }
            }
        }

        let base_request = ModelRequest::new(system, vec![ModelMessage::user(prompt)])
            .with_model(request.model.clone());
        let model = Arc::clone(&self.model);
        let cancel = ctx.cancellation().clone();

        let mut rx = with_resilience(
            move |model_override| {
                let mut req = base_request.clone();
                if model_override.is_some() {
                    req.model = model_override;
                }
                let model = Arc::clone(&model);
                let cancel = cancel.clone();
                async move { model.invoke_streaming(req, &cancel).await }
            },
            &self.config.retry,
            self.fallback.as_deref(),
            ctx.cancellation(),
        )
        .await?;

        let mut text = String::new();
        let mut usage = UsageInfo::default();
        while let Some(part) = rx.recv().await {
            match part {
                StreamPart::TextDelta { delta } => {
                    text.push_str(&delta);
                    ctx.emit(AgentEvent::TextDelta { delta });
                }
                StreamPart::Usage { usage: reported } => usage = reported,
                StreamPart::Error { message } => {
                    return Err(UpstreamError::from_message(message));
                }
                StreamPart::ToolCall { .. } => {}
            }
            if ctx.is_cancelled() {
                return Err(UpstreamError::Cancelled);
            }
        }
        Ok((text, usage))
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Partition planning tool calls into route and task declarations,
/// skipping malformed arguments.
fn split_plan_calls(calls: &[crate::ai::types::ToolCall]) -> (Vec<Task>, Vec<Task>) {
    let mut routes = Vec::new();
    let mut tasks = Vec::new();
    for call in calls {
        match call.name.as_str() {
            ROUTE_TOOL | TASK_TOOL => match serde_json::from_value::<Task>(call.arguments.clone())
            {
                Ok(task) => {
                    if call.name == ROUTE_TOOL {
                        routes.push(task);
                    } else {
                        tasks.push(task);
                    }
                }
                Err(e) => warn!(tool = %call.name, "malformed planning call skipped: {}", e),
            },
            other => warn!(tool = %other, "unexpected planning tool call ignored"),
        }
    }
    (routes, tasks)
}

fn route_tool_def() -> ToolDef {
    ToolDef::new(
        ROUTE_TOOL,
        "Hand the entire request to one specialist agent.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {"type": "string"},
                "query": {"type": "string"}
            },
            "required": ["agent", "query"]
        }),
    )
}

fn task_tool_def() -> ToolDef {
    ToolDef::new(
        TASK_TOOL,
        "Declare one independent sub-task; call once per task.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {"type": "string"},
                "query": {"type": "string"},
                "skills": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["agent", "query"]
        }),
    )
}
