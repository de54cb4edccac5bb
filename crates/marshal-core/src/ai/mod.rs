//! Model invocation contract.
//!
//! The engine treats the language model as an opaque upstream: a call takes
//! system text, messages, and tool definitions, and returns text, tool
//! calls, and usage counters. Hosts plug in a concrete provider by
//! implementing [`ModelClient`].

pub mod client;
pub mod error;
pub mod types;

pub use client::ModelClient;
pub use error::UpstreamError;
pub use types::{
    ClarificationItem, ModelMessage, ModelOutput, ModelRequest, Role, StreamPart, ToolCall,
    ToolDef, ToolResult,
};
