//! In-process default stores.
//!
//! Conversations are held as raw JSON records and decoded on read; a
//! record that fails to decode is skipped with a warning instead of
//! failing the whole read. Mutations for a single conversation id are
//! serialized through a per-id lock so interleaved read-modify-write
//! cannot corrupt message order.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::skills::{Skill, SkillInfo};
use super::{Conversation, ConversationStore, ConversationSummary, MemoryStore, SkillStore,
    StoredMessage,
};

struct ConversationRecord {
    title: String,
    messages: Vec<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory conversation store with per-id mutation locks.
#[derive(Default)]
pub struct InMemoryConversationStore {
    records: DashMap<String, ConversationRecord>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn decode_messages(id: &str, raw: &[serde_json::Value]) -> Vec<StoredMessage> {
        raw.iter()
            .filter_map(|value| match serde_json::from_value(value.clone()) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(conversation_id = %id, "skipping corrupt message record: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Insert a raw record directly. Test hook for corrupt-record handling.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, id: &str, raw: serde_json::Value) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.messages.push(raw);
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, title: &str) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.records.insert(
            id.clone(),
            ConversationRecord {
                title: title.to_string(),
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Conversation>> {
        Ok(self.records.get(id).map(|record| Conversation {
            id: id.to_string(),
            title: record.title.clone(),
            messages: Self::decode_messages(id, &record.messages),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }))
    }

    async fn list(&self) -> anyhow::Result<Vec<ConversationSummary>> {
        let mut summaries: Vec<_> = self
            .records
            .iter()
            .map(|entry| ConversationSummary {
                id: entry.key().clone(),
                title: entry.title.clone(),
                message_count: entry.messages.len(),
                created_at: entry.created_at,
                updated_at: entry.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn append(&self, id: &str, message: StoredMessage) -> anyhow::Result<bool> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.messages.push(serde_json::to_value(&message)?);
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_messages(
        &self,
        id: &str,
        messages: Vec<StoredMessage>,
    ) -> anyhow::Result<bool> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.messages = messages
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<_, _>>()?;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        self.locks.remove(id);
        Ok(self.records.remove(id).is_some())
    }

    async fn clear(&self, id: &str) -> anyhow::Result<bool> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.messages.clear();
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// In-memory namespaced key-value store.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    entries: DashMap<(String, String), String>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|v| v.clone()))
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> anyhow::Result<bool> {
        Ok(self
            .entries
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    async fn list_keys(&self, namespace: &str) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Skill store backed by a fixed set registered at construction.
#[derive(Default)]
pub struct StaticSkillStore {
    skills: DashMap<String, Skill>,
}

impl StaticSkillStore {
    pub fn new(skills: impl IntoIterator<Item = Skill>) -> Self {
        let store = Self::default();
        for skill in skills {
            store.skills.insert(skill.name.clone(), skill);
        }
        store
    }
}

#[async_trait]
impl SkillStore for StaticSkillStore {
    async fn list_skills(&self) -> anyhow::Result<Vec<SkillInfo>> {
        let mut infos: Vec<SkillInfo> = self
            .skills
            .iter()
            .map(|entry| SkillInfo::from(entry.value()))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn get_skill(&self, name: &str) -> anyhow::Result<Option<Skill>> {
        Ok(self.skills.get(name).map(|entry| entry.clone()))
    }
}
