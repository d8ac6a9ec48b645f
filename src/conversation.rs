//! Conversation memory: user and assistant turns in a dedicated collection.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::config::RagConfig;
use crate::embedding::registry::SharedModelRegistry;
use crate::error::RagResult;
use crate::ids;
use crate::processor::{system_metadata, SharedProcessor};
use crate::store::SearchMatch;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Prefix of the turn's record id.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Value of the record's `type` metadata key.
    pub fn record_type(&self) -> &'static str {
        match self {
            Self::User => "user_input",
            Self::Assistant => "assistant_response",
        }
    }
}

/// Records conversation turns with the shared model and retrieves relevant
/// earlier turns for a query.
///
/// Nothing here returns an error to the caller: failures are logged and show up
/// as `None` or an empty list. The `try_*` methods expose the reason.
pub struct ConversationContextManager {
    inner: SharedProcessor,
}

impl ConversationContextManager {
    pub fn new(
        collection_name: impl Into<String>,
        persist_dir: impl Into<PathBuf>,
        model_name: impl Into<String>,
        registry: Arc<SharedModelRegistry>,
    ) -> Self {
        Self {
            inner: SharedProcessor::new(
                registry,
                model_name.into(),
                collection_name.into(),
                persist_dir.into(),
            ),
        }
    }

    /// Manager for the configured conversation collection.
    pub fn from_config(config: &RagConfig, registry: Arc<SharedModelRegistry>) -> Self {
        Self::new(
            config.collections.conversation.clone(),
            config.resolved_storage_path(),
            config.embedding.model.clone(),
            registry,
        )
    }

    pub fn collection_name(&self) -> &str {
        self.inner.collection_name()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }

    pub fn initialize(&self) -> bool {
        match self.inner.try_get() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(collection = %self.collection_name(), error = %e, "conversation manager initialization failed");
                false
            }
        }
    }

    pub fn add_user_turn(&self, text: &str, conversation_id: Option<&str>) -> Option<String> {
        self.add_turn(Role::User, text, conversation_id)
    }

    pub fn add_assistant_turn(&self, text: &str, conversation_id: Option<&str>) -> Option<String> {
        self.add_turn(Role::Assistant, text, conversation_id)
    }

    pub fn add_turn(&self, role: Role, text: &str, conversation_id: Option<&str>) -> Option<String> {
        match self.try_add_turn(role, text, conversation_id) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(role = role.id_prefix(), error = %e, "failed to add conversation turn");
                None
            }
        }
    }

    /// Embed and store one turn, returning its record id. A random conversation
    /// id is generated when none is given.
    pub fn try_add_turn(
        &self,
        role: Role,
        text: &str,
        conversation_id: Option<&str>,
    ) -> RagResult<String> {
        let processor = self.inner.try_get()?;
        let embedding = processor.model().embed(text)?;

        let conversation_id = conversation_id
            .map(str::to_string)
            .unwrap_or_else(ids::new_conversation_id);
        let id = ids::turn_id(role.id_prefix(), &conversation_id);

        let mut metadata = system_metadata(role.record_type());
        metadata.insert("conversation_id".into(), Value::String(conversation_id));

        processor.write(&id, text, embedding, metadata)?;
        tracing::debug!(id = %id, role = role.id_prefix(), "conversation turn stored");
        Ok(id)
    }

    pub fn get_relevant_context(&self, query: &str, k: usize) -> Vec<SearchMatch> {
        self.try_get_relevant_context(query, k).unwrap_or_else(|e| {
            tracing::warn!(collection = %self.collection_name(), error = %e, "failed to get relevant context");
            Vec::new()
        })
    }

    /// Up to `k` stored turns closest to `query`, nearest first.
    pub fn try_get_relevant_context(&self, query: &str, k: usize) -> RagResult<Vec<SearchMatch>> {
        self.inner.try_get()?.try_search_similar(query, k)
    }
}
