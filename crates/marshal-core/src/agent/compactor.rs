//! Conversation compaction.
//!
//! Long histories are folded into a single summary message plus the most
//! recent turns, keeping prompt size bounded across long-running
//! conversations. Summaries are tagged in message metadata so a later
//! compaction recognizes them and carries their content forward.

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ai::client::ModelClient;
use crate::ai::types::{ModelMessage, ModelRequest, Role};
use crate::storage::{ConversationStore, StoredMessage};

const SUMMARY_INSTRUCTIONS: &str = "Summarize the conversation so far for an assistant that will \
continue it. Preserve stated facts, decisions, open questions, and user preferences. Write a \
compact factual digest, not a narrative.";

#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Compact only when the message count exceeds this.
    pub threshold: usize,
    /// Recent messages kept verbatim after the summary.
    pub preserve_recent: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 20,
            preserve_recent: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub summarized_count: usize,
    pub total_after: usize,
}

/// Compact the conversation if it exceeds the threshold. Returns `None`
/// when nothing was done (missing conversation or under the threshold).
pub async fn compact_if_needed(
    store: &dyn ConversationStore,
    model: &dyn ModelClient,
    conversation_id: &str,
    config: &CompactionConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<Option<CompactionReport>> {
    let Some(conversation) = store.get(conversation_id).await? else {
        return Ok(None);
    };
    if conversation.messages.len() <= config.threshold {
        return Ok(None);
    }

    let split = conversation.messages.len() - config.preserve_recent.min(conversation.messages.len());
    let (head, tail) = conversation.messages.split_at(split);

    let mut transcript = String::new();
    for message in head {
        if message.is_summary() {
            // Earlier compactions fold into the new summary.
            transcript.push_str("Previous summary:\n");
            transcript.push_str(&message.content);
        } else {
            transcript.push_str(&format!("{:?}: {}", message.role, message.content));
        }
        transcript.push_str("\n\n");
    }

    let request = ModelRequest::new(
        SUMMARY_INSTRUCTIONS,
        vec![ModelMessage::user(transcript)],
    );
    let output = model
        .invoke(request, cancel)
        .await
        .map_err(|e| anyhow::anyhow!(e.message()))
        .context("compaction summary call failed")?;

    let summary = StoredMessage::new(Role::System, output.text)
        .with_metadata(serde_json::json!({"summary": true}));
    let mut replacement = Vec::with_capacity(tail.len() + 1);
    replacement.push(summary);
    replacement.extend_from_slice(tail);
    let total_after = replacement.len();

    store
        .replace_messages(conversation_id, replacement)
        .await
        .context("failed to persist compacted history")?;

    info!(
        conversation_id = %conversation_id,
        summarized = head.len(),
        total_after,
        "compacted conversation history"
    );
    Ok(Some(CompactionReport {
        summarized_count: head.len(),
        total_after,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::error::UpstreamError;
    use crate::storage::memory::InMemoryConversationStore;
    use crate::testing::MockModel;

    async fn seed(store: &InMemoryConversationStore, count: usize) -> String {
        let id = store.create("long chat").await.unwrap();
        for i in 0..count {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store
                .append(&id, StoredMessage::new(role, format!("turn {i}")))
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test]
    async fn under_threshold_is_a_no_op() {
        let store = InMemoryConversationStore::new();
        let id = seed(&store, 20).await;
        let model = MockModel::empty();

        let report = compact_if_needed(
            &store,
            &model,
            &id,
            &CompactionConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(report.is_none());
        assert_eq!(model.request_count(), 0);
        assert_eq!(store.get(&id).await.unwrap().unwrap().messages.len(), 20);
    }

    #[tokio::test]
    async fn over_threshold_folds_into_summary_plus_tail() {
        let store = InMemoryConversationStore::new();
        let id = seed(&store, 25).await;
        let model = MockModel::new([Ok(MockModel::text_output("the digest"))]);

        let report = compact_if_needed(
            &store,
            &model,
            &id,
            &CompactionConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report.summarized_count, 21);
        assert_eq!(report.total_after, 5);

        let messages = store.get(&id).await.unwrap().unwrap().messages;
        assert_eq!(messages.len(), 5);
        assert!(messages[0].is_summary());
        assert_eq!(messages[0].content, "the digest");
        // The preserved tail is byte-identical to the last four turns.
        let expected: Vec<String> = (21..25).map(|i| format!("turn {i}")).collect();
        let tail: Vec<&str> = messages[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(tail, expected);
    }

    #[tokio::test]
    async fn recompaction_carries_previous_summary_forward() {
        let store = InMemoryConversationStore::new();
        let id = store.create("twice").await.unwrap();
        store
            .append(
                &id,
                StoredMessage::new(Role::System, "earlier digest")
                    .with_metadata(serde_json::json!({"summary": true})),
            )
            .await
            .unwrap();
        for i in 0..24 {
            store
                .append(&id, StoredMessage::new(Role::User, format!("turn {i}")))
                .await
                .unwrap();
        }
        let model = MockModel::new([Ok(MockModel::text_output("merged digest"))]);

        compact_if_needed(
            &store,
            &model,
            &id,
            &CompactionConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();

        let prompt = model.requests.lock()[0].messages[0].content.clone();
        assert!(prompt.contains("Previous summary:\nearlier digest"));

        let messages = store.get(&id).await.unwrap().unwrap().messages;
        assert_eq!(messages.len(), 5);
        assert!(messages[0].is_summary());
        assert_eq!(messages[0].content, "merged digest");
    }

    #[tokio::test]
    async fn missing_conversation_is_a_no_op() {
        let store = InMemoryConversationStore::new();
        let model = MockModel::empty();
        let report = compact_if_needed(
            &store,
            &model,
            "absent",
            &CompactionConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn summary_failure_leaves_history_untouched() {
        let store = InMemoryConversationStore::new();
        let id = seed(&store, 25).await;
        let model = MockModel::new([Err(UpstreamError::from_message("HTTP 500 upstream down"))]);

        let result = compact_if_needed(
            &store,
            &model,
            &id,
            &CompactionConfig::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(store.get(&id).await.unwrap().unwrap().messages.len(), 25);
    }
}
