//! Task executor — runs one delegated task against a specialist agent.
//!
//! The contract is "never throws": delegation policy violations (unknown
//! agent, orchestrator target, depth, self/cyclic delegation, guard
//! rejection) and upstream failures all come back as error-shaped
//! `TaskResult`s, so a batch of tasks fails independently.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::context::DelegationContext;
use super::events::AgentEvent;
use super::registry::AgentRegistry;
use super::retry::{with_resilience, FallbackFn, RetryConfig};
use super::types::{AgentResponse, TaskResult};
use crate::ai::client::ModelClient;
use crate::ai::types::{ClarificationItem, ModelMessage, ModelRequest, ToolDef};
use crate::storage::SkillStore;

/// Caller name used when a task is executed outside any delegation scope.
const DETACHED_CALLER: &str = "root";

/// Max length of summary text embedded in event payloads.
const EVENT_SUMMARY_MAX: usize = 200;

/// Well-known tool specialists use to ask for more information.
pub const CLARIFY_TOOL: &str = "request_clarification";

/// Well-known memory tool name.
pub const MEMORY_TOOL: &str = "memory";

const CLARIFY_SUFFIX: &str = "\n\nIf you are missing information you need to complete this task, \
call the `request_clarification` tool with your questions instead of guessing.";

const MEMORY_SUFFIX: &str = "\n\nYou have access to a persistent `memory` tool. Use it to store \
and recall durable facts across conversations.";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_delegation_depth: usize,
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_delegation_depth: 3,
            retry: RetryConfig::default(),
        }
    }
}

/// Executes delegated tasks. Cheap to clone and share across a request.
#[derive(Clone)]
pub struct TaskExecutor {
    registry: Arc<AgentRegistry>,
    model: Arc<dyn ModelClient>,
    skills: Arc<dyn SkillStore>,
    fallback: Option<Arc<FallbackFn>>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        model: Arc<dyn ModelClient>,
        skills: Arc<dyn SkillStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            model,
            skills,
            fallback: None,
            config,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<FallbackFn>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Execute one task. Reads the delegation context of the enclosing
    /// scope; outside any scope a detached root context is used.
    pub async fn execute_task(
        &self,
        agent_name: &str,
        query: &str,
        skills: Option<&[String]>,
    ) -> TaskResult {
        let ctx = DelegationContext::current().unwrap_or_else(|| {
            DelegationContext::root(DETACHED_CALLER, CancellationToken::new(), None)
        });
        let caller = ctx.current_agent().to_string();

        ctx.emit(AgentEvent::DelegateStart {
            from: caller.clone(),
            to: agent_name.to_string(),
            query: truncate_chars(query, EVENT_SUMMARY_MAX).to_string(),
        });

        // Delegation legality, in order. Each violation is a result-shaped
        // error, not a panic.
        let Some(target) = self.registry.get(agent_name) else {
            return self.reject(&ctx, &caller, agent_name, query,
                format!("unknown agent '{agent_name}'"));
        };
        if target.is_orchestrator {
            return self.reject(&ctx, &caller, agent_name, query,
                format!("agent '{agent_name}' is an orchestrator and cannot be a delegation target"));
        }
        if target.tools.is_empty() {
            return self.reject(&ctx, &caller, agent_name, query,
                format!("agent '{agent_name}' has no tools and cannot execute tasks"));
        }
        if ctx.depth() >= self.config.max_delegation_depth {
            return self.reject(&ctx, &caller, agent_name, query,
                format!(
                    "delegation depth limit ({}) reached; chain: {}",
                    self.config.max_delegation_depth,
                    ctx.chain().join(" -> ")
                ));
        }
        if caller == agent_name {
            return self.reject(&ctx, &caller, agent_name, query,
                format!("agent '{caller}' cannot delegate to itself"));
        }
        if ctx.chain().iter().any(|a| a == agent_name) {
            return self.reject(&ctx, &caller, agent_name, query,
                format!(
                    "cyclic delegation: '{agent_name}' already appears in chain {}",
                    ctx.chain().join(" -> ")
                ));
        }

        // Effective instructions: base (or override) + query-phase skills +
        // fixed suffixes.
        let mut instructions = self
            .registry
            .effective_instructions(agent_name)
            .unwrap_or_else(|| target.instructions.clone());
        let mut response_skills = Vec::new();
        if let Some(names) = skills {
            for name in names {
                match self.skills.get_skill(name).await {
                    Ok(Some(skill)) => {
                        if skill.phase.applies_to_query() {
                            ctx.emit(AgentEvent::SkillInject {
                                agent: agent_name.to_string(),
                                skill: skill.name.clone(),
                                phase: skill.phase.as_str().to_string(),
                            });
                            instructions.push_str("\n\n");
                            instructions.push_str(&skill.content);
                        }
                        if skill.phase.applies_to_response() {
                            response_skills.push(skill);
                        }
                    }
                    Ok(None) => warn!(skill = %name, "requested skill not found"),
                    Err(e) => warn!(skill = %name, "skill lookup failed: {}", e),
                }
            }
        }
        instructions.push_str(CLARIFY_SUFFIX);
        if !target.disable_memory_tool {
            instructions.push_str(MEMORY_SUFFIX);
        }

        // Pre-execution guard.
        if let Some(guard) = &target.guard {
            if let Err(reason) = guard.allow(agent_name, query, &ctx).await {
                warn!(agent = %agent_name, reason = %reason, "delegation blocked by guard");
                return self.reject(&ctx, &caller, agent_name, query,
                    format!("delegation to '{agent_name}' blocked: {reason}"));
            }
        }

        let mut tools = vec![clarify_tool_def()];
        if !target.disable_memory_tool {
            tools.push(memory_tool_def());
        }
        tools.extend(target.tools.iter().cloned());

        ctx.emit(AgentEvent::AgentStart {
            agent: agent_name.to_string(),
        });

        let derived = ctx.derive(agent_name);
        let cancel = derived.cancellation().clone();
        let base_request =
            ModelRequest::new(instructions, vec![ModelMessage::user(query)]).with_tools(tools);
        let model = Arc::clone(&self.model);
        let started = Instant::now();

        let outcome = derived
            .clone()
            .scope(with_resilience(
                move |model_override| {
                    let request = base_request.clone().with_model(model_override);
                    let model = Arc::clone(&model);
                    let cancel = cancel.clone();
                    async move { model.invoke(request, &cancel).await }
                },
                &self.config.retry,
                self.fallback.as_deref(),
                derived.cancellation(),
            ))
            .await;

        match outcome {
            Ok(output) => {
                let mut clarification_items = Vec::new();
                let mut tools_used = Vec::new();
                for call in &output.tool_calls {
                    if call.name == CLARIFY_TOOL {
                        clarification_items.extend(parse_clarifications(&call.arguments));
                    } else {
                        tools_used.push(call.name.clone());
                        ctx.emit(AgentEvent::ToolCall {
                            agent: agent_name.to_string(),
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        });
                    }
                }
                for tool_result in &output.tool_results {
                    ctx.emit(AgentEvent::ToolResult {
                        agent: agent_name.to_string(),
                        id: tool_result.id.clone(),
                        output: truncate_chars(&tool_result.output, EVENT_SUMMARY_MAX).to_string(),
                        is_error: tool_result.is_error,
                    });
                }

                let usage = output
                    .usage
                    .with_duration_ms(started.elapsed().as_millis() as u64);
                let response = AgentResponse {
                    text: output.text,
                    clarification_items,
                    tools_used,
                    usage,
                };

                let summary = truncate_chars(&response.text, EVENT_SUMMARY_MAX).to_string();
                ctx.emit(AgentEvent::AgentEnd {
                    agent: agent_name.to_string(),
                    summary: summary.clone(),
                });
                ctx.emit(AgentEvent::DelegateEnd {
                    from: caller,
                    to: agent_name.to_string(),
                    ok: true,
                    summary,
                });

                let mut result = TaskResult::success(agent_name, query, response);
                result.response_skills = response_skills;
                result
            }
            Err(err) if err.is_cancelled() => {
                ctx.emit(AgentEvent::DelegateEnd {
                    from: caller,
                    to: agent_name.to_string(),
                    ok: false,
                    summary: "cancelled".to_string(),
                });
                TaskResult::cancelled(agent_name, query)
            }
            Err(err) => {
                let message = err.message();
                warn!(agent = %agent_name, "delegated call failed: {}", message);
                ctx.emit(AgentEvent::AgentEnd {
                    agent: agent_name.to_string(),
                    summary: truncate_chars(&message, EVENT_SUMMARY_MAX).to_string(),
                });
                ctx.emit(AgentEvent::DelegateEnd {
                    from: caller,
                    to: agent_name.to_string(),
                    ok: false,
                    summary: truncate_chars(&message, EVENT_SUMMARY_MAX).to_string(),
                });
                TaskResult::failure(agent_name, query, message)
            }
        }
    }

    fn reject(
        &self,
        ctx: &DelegationContext,
        caller: &str,
        agent_name: &str,
        query: &str,
        reason: String,
    ) -> TaskResult {
        ctx.emit(AgentEvent::DelegateEnd {
            from: caller.to_string(),
            to: agent_name.to_string(),
            ok: false,
            summary: truncate_chars(&reason, EVENT_SUMMARY_MAX).to_string(),
        });
        TaskResult::failure(agent_name, query, reason)
    }
}

fn clarify_tool_def() -> ToolDef {
    ToolDef::new(
        CLARIFY_TOOL,
        "Ask the user for missing information instead of guessing.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "question": {"type": "string"},
                            "context": {"type": "string"}
                        },
                        "required": ["question"]
                    }
                }
            },
            "required": ["items"]
        }),
    )
}

fn memory_tool_def() -> ToolDef {
    ToolDef::new(
        MEMORY_TOOL,
        "Store or recall a durable fact.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["get", "set"]},
                "key": {"type": "string"},
                "value": {"type": "string"}
            },
            "required": ["action", "key"]
        }),
    )
}

fn parse_clarifications(arguments: &serde_json::Value) -> Vec<ClarificationItem> {
    if let Some(items) = arguments.get("items") {
        if let Ok(items) = serde_json::from_value::<Vec<ClarificationItem>>(items.clone()) {
            return items;
        }
    }
    if let Ok(item) = serde_json::from_value::<ClarificationItem>(arguments.clone()) {
        return vec![item];
    }
    Vec::new()
}

/// Truncate to at most `max_chars` characters.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::registry::{AgentRegistration, DelegationGuard};
    use crate::storage::memory::StaticSkillStore;
    use crate::storage::skills::{Skill, SkillPhase};
    use crate::testing::MockModel;
    use async_trait::async_trait;

    fn research_agent() -> AgentRegistration {
        AgentRegistration::new("research", "You research topics.").with_tools(vec![ToolDef::new(
            "search",
            "Search",
            serde_json::json!({"type": "object"}),
        )])
    }

    fn executor_with(
        model: MockModel,
        registrations: Vec<AgentRegistration>,
        skills: Vec<Skill>,
    ) -> TaskExecutor {
        let registry = Arc::new(AgentRegistry::new());
        for registration in registrations {
            registry.register(registration).unwrap();
        }
        TaskExecutor::new(
            registry,
            Arc::new(model),
            Arc::new(StaticSkillStore::new(skills)),
            ExecutorConfig::default(),
        )
    }

    #[tokio::test]
    async fn unknown_agent_is_error_result() {
        let executor = executor_with(MockModel::empty(), vec![], vec![]);
        let result = executor.execute_task("ghost", "do things", None).await;
        assert!(result.error.unwrap().contains("unknown agent 'ghost'"));
    }

    #[tokio::test]
    async fn orchestrator_target_is_rejected() {
        let executor = executor_with(
            MockModel::empty(),
            vec![AgentRegistration::new("boss", "You orchestrate.").orchestrator()],
            vec![],
        );
        let result = executor.execute_task("boss", "plan this", None).await;
        let error = result.error.unwrap();
        assert!(error.contains("'boss'"));
        assert!(error.contains("orchestrator"));
    }

    #[tokio::test]
    async fn toolless_agent_is_rejected() {
        let executor = executor_with(
            MockModel::empty(),
            vec![AgentRegistration::new("idle", "No tools here.")],
            vec![],
        );
        let result = executor.execute_task("idle", "work", None).await;
        assert!(result.error.unwrap().contains("no tools"));
    }

    #[tokio::test]
    async fn depth_limit_reports_chain() {
        let executor = executor_with(MockModel::empty(), vec![research_agent()], vec![]);
        let ctx = DelegationContext::root("supervisor", CancellationToken::new(), None)
            .derive("a")
            .derive("b")
            .derive("c");

        let result = ctx
            .scope(async { executor.execute_task("research", "query", None).await })
            .await;
        let error = result.error.unwrap();
        assert!(error.contains("depth limit"));
        assert!(error.contains("supervisor -> a -> b -> c"));
    }

    #[tokio::test]
    async fn self_delegation_is_rejected() {
        let executor = executor_with(MockModel::empty(), vec![research_agent()], vec![]);
        let ctx = DelegationContext::root("supervisor", CancellationToken::new(), None)
            .derive("research");

        let result = ctx
            .scope(async { executor.execute_task("research", "query", None).await })
            .await;
        assert!(result.error.unwrap().contains("delegate to itself"));
    }

    #[tokio::test]
    async fn cyclic_delegation_is_rejected_anywhere_in_chain() {
        let executor = executor_with(MockModel::empty(), vec![research_agent()], vec![]);
        // research appears earlier in the chain, not as the immediate caller.
        let ctx = DelegationContext::root("supervisor", CancellationToken::new(), None)
            .derive("research")
            .derive("writer");

        let result = ctx
            .scope(async { executor.execute_task("research", "query", None).await })
            .await;
        assert!(result.error.unwrap().contains("cyclic delegation"));
    }

    #[tokio::test]
    async fn success_builds_instructions_with_skills_and_suffixes() {
        let model = Arc::new(MockModel::new([Ok(MockModel::text_output("findings"))]));
        let skill = Skill {
            name: "cite-sources".to_string(),
            description: "Citation discipline".to_string(),
            tags: vec![],
            phase: SkillPhase::Query,
            content: "Always cite primary sources.".to_string(),
        };
        let registry = Arc::new(AgentRegistry::new());
        registry.register(research_agent()).unwrap();
        let executor = TaskExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&model) as Arc<dyn crate::ai::client::ModelClient>,
            Arc::new(StaticSkillStore::new([skill])),
            ExecutorConfig::default(),
        );

        let ctx = DelegationContext::root("supervisor", CancellationToken::new(), None);
        let result = ctx
            .scope(async {
                executor
                    .execute_task(
                        "research",
                        "history of rust",
                        Some(&["cite-sources".to_string()]),
                    )
                    .await
            })
            .await;

        assert!(result.is_success());
        assert_eq!(result.response.text, "findings");
        assert!(result.response.usage.total_tokens > 0);

        let requests = model.requests.lock();
        let system = &requests[0].system;
        assert!(system.contains("You research topics."));
        assert!(system.contains("Always cite primary sources."));
        assert!(system.contains("request_clarification"));
        assert!(system.contains("memory"));
        let tool_names: Vec<_> = requests[0].tools.iter().map(|t| t.name.clone()).collect();
        assert!(tool_names.contains(&"search".to_string()));
        assert!(tool_names.contains(&CLARIFY_TOOL.to_string()));
    }

    #[tokio::test]
    async fn response_phase_skills_are_collected_not_injected() {
        let model = MockModel::new([Ok(MockModel::text_output("done"))]);
        let skill = Skill {
            name: "summarize-tersely".to_string(),
            description: "Terse synthesis".to_string(),
            tags: vec![],
            phase: SkillPhase::Response,
            content: "Keep the final answer short.".to_string(),
        };
        let executor = executor_with(model, vec![research_agent()], vec![skill]);

        let result = executor
            .execute_task("research", "q", Some(&["summarize-tersely".to_string()]))
            .await;
        assert_eq!(result.response_skills.len(), 1);
        assert_eq!(result.response_skills[0].name, "summarize-tersely");
    }

    #[tokio::test]
    async fn guard_rejection_is_blocked_not_crashed() {
        struct DenyAll;
        #[async_trait]
        impl DelegationGuard for DenyAll {
            async fn allow(
                &self,
                _target: &str,
                _query: &str,
                _ctx: &DelegationContext,
            ) -> Result<(), String> {
                Err("not during business hours".to_string())
            }
        }

        let executor = executor_with(
            MockModel::empty(),
            vec![research_agent().with_guard(Arc::new(DenyAll))],
            vec![],
        );
        let result = executor.execute_task("research", "query", None).await;
        let error = result.error.unwrap();
        assert!(error.contains("blocked"));
        assert!(error.contains("business hours"));
    }

    #[tokio::test]
    async fn clarification_calls_become_items() {
        let call = MockModel::tool_call(
            CLARIFY_TOOL,
            serde_json::json!({"items": [{"question": "Which year?"}]}),
        );
        let model = MockModel::new([Ok(MockModel::tool_output(vec![call]))]);
        let executor = executor_with(model, vec![research_agent()], vec![]);

        let result = executor.execute_task("research", "query", None).await;
        assert!(result.is_success());
        assert_eq!(result.response.clarification_items.len(), 1);
        assert_eq!(result.response.clarification_items[0].question, "Which year?");
        // Clarification tool is not counted as a used tool.
        assert!(result.response.tools_used.is_empty());
    }

    #[tokio::test]
    async fn upstream_permanent_error_becomes_error_result() {
        let model = MockModel::new([Err(crate::ai::error::UpstreamError::http(
            401,
            "bad credentials",
        ))]);
        let executor = executor_with(model, vec![research_agent()], vec![]);

        let result = executor.execute_task("research", "query", None).await;
        assert!(result.error.unwrap().contains("bad credentials"));
        assert!(!result.cancelled);
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        // 300 chars, 600 bytes: the cap applies to characters.
        let s = "é".repeat(300);
        let truncated = truncate_chars(&s, 200);
        assert_eq!(truncated.chars().count(), 200);
        assert!(truncated.chars().all(|c| c == 'é'));

        assert_eq!(truncate_chars("short", 200), "short");
        let exact = "a".repeat(200);
        assert_eq!(truncate_chars(&exact, 200), exact);
    }

    #[tokio::test]
    async fn tool_results_surface_as_events() {
        let mut output = MockModel::tool_output(vec![MockModel::tool_call(
            "search",
            serde_json::json!({"q": "rust history"}),
        )]);
        output.tool_results = vec![crate::ai::types::ToolResult {
            id: "call-1".to_string(),
            name: "search".to_string(),
            output: "10 matches".to_string(),
            is_error: false,
        }];
        let executor = executor_with(MockModel::new([Ok(output)]), vec![research_agent()], vec![]);

        let (sink, mut rx) = crate::agent::events::EventSink::channel();
        let ctx = DelegationContext::root("supervisor", CancellationToken::new(), Some(sink));
        let result = ctx
            .scope(async { executor.execute_task("research", "query", None).await })
            .await;
        assert!(result.is_success());

        let mut saw_tool_result = false;
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::ToolResult {
                agent,
                id,
                output,
                is_error,
            } = event
            {
                assert_eq!(agent, "research");
                assert_eq!(id, "call-1");
                assert_eq!(output, "10 matches");
                assert!(!is_error);
                saw_tool_result = true;
            }
        }
        assert!(saw_tool_result);
    }
}
