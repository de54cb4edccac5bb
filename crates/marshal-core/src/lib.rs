//! Marshal core — delegation and streaming orchestration engine.
//!
//! A supervisor accepts a natural-language request and decides whether to
//! answer directly, route it to one specialist agent, or fan it out into
//! independent tasks executed concurrently, then synthesizes the results
//! into one reply. Progress streams to the caller as ordered events the
//! whole time.
//!
//! The engine is transport-agnostic: `marshal-server` is a thin axum layer
//! that maps the event protocol onto SSE. Model invocation and persistent
//! storage are trait seams (`ai::ModelClient`, `storage::*`) supplied by
//! the host.

pub mod agent;
pub mod ai;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::compactor::{compact_if_needed, CompactionConfig, CompactionReport};
pub use agent::context::DelegationContext;
pub use agent::events::{AgentEvent, EventSink, StatusCode};
pub use agent::executor::{ExecutorConfig, TaskExecutor};
pub use agent::orchestrator::{Outcome, Supervisor, SupervisorConfig, SupervisorRequest};
pub use agent::protocol::{pump, WireEvent};
pub use agent::registry::{AgentRegistration, AgentRegistry, DelegationGuard};
pub use agent::retry::{FallbackFn, RetryConfig};
pub use agent::types::{AgentResponse, Task, TaskResult};
pub use agent::usage::UsageInfo;
