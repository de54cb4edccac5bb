//! Orchestration engine: delegation context, events, resilience, the task
//! executor, and the supervisor that ties them together.

pub mod compactor;
pub mod context;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod types;
pub mod usage;

pub use compactor::{compact_if_needed, CompactionConfig, CompactionReport};
pub use context::DelegationContext;
pub use events::{AgentEvent, EventSink, StatusCode};
pub use executor::{ExecutorConfig, TaskExecutor};
pub use orchestrator::{Outcome, Supervisor, SupervisorConfig, SupervisorRequest};
pub use protocol::{pump, WireEvent};
pub use registry::{AgentRegistration, AgentRegistry, DelegationGuard};
pub use retry::{with_resilience, FallbackFn, RetryConfig};
pub use types::{AgentResponse, Task, TaskResult};
pub use usage::UsageInfo;
