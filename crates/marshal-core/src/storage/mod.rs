//! Storage contracts.
//!
//! The engine only reads and appends; ownership of persistence lives with
//! the host. All operations return `None`/`false` rather than erroring on
//! "not found". The default in-process implementations live in
//! [`memory`].

pub mod memory;
pub mod skills;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ai::types::Role;
pub use skills::{Skill, SkillInfo, SkillPhase};

/// One conversation turn as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata. Compaction tags summary messages here.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl StoredMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this message is a compaction summary of earlier turns.
    pub fn is_summary(&self) -> bool {
        self.metadata
            .get("summary")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<StoredMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing entry without message bodies.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conversation persistence. Append/replace/clear for a single id must be
/// serialized by the implementation; operations on different ids must not
/// block each other.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self, title: &str) -> anyhow::Result<String>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Conversation>>;
    async fn list(&self) -> anyhow::Result<Vec<ConversationSummary>>;
    /// Returns false if the conversation does not exist.
    async fn append(&self, id: &str, message: StoredMessage) -> anyhow::Result<bool>;
    /// Atomically swap the full message history (used by compaction).
    async fn replace_messages(&self, id: &str, messages: Vec<StoredMessage>)
        -> anyhow::Result<bool>;
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;
    async fn clear(&self, id: &str) -> anyhow::Result<bool>;
}

/// Namespaced key-value memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()>;
    async fn delete(&self, namespace: &str, key: &str) -> anyhow::Result<bool>;
    async fn list_keys(&self, namespace: &str) -> anyhow::Result<Vec<String>>;
}

/// Read-only skill lookup.
#[async_trait]
pub trait SkillStore: Send + Sync {
    async fn list_skills(&self) -> anyhow::Result<Vec<SkillInfo>>;
    async fn get_skill(&self, name: &str) -> anyhow::Result<Option<Skill>>;
}
