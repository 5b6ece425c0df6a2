//! In-memory conversation store, one lock per conversation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::conversation::{ConversationId, ConversationStore};
use crate::error::Result;
use crate::types::Message;

type History = Arc<Mutex<Vec<Message>>>;

/// Process-lifetime conversation store.
///
/// The outer map lock is only held long enough to find or insert a
/// conversation; appends then serialize on that conversation's own mutex,
/// so unrelated conversations never wait on each other.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, History>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, id: &ConversationId) -> Option<History> {
        self.conversations.read().await.get(id).cloned()
    }

    async fn get_or_insert(&self, id: &ConversationId) -> History {
        if let Some(history) = self.get(id).await {
            return history;
        }
        self.conversations
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn resolve_or_create(&self, identifier: Option<&str>) -> Result<(ConversationId, bool)> {
        let identifier = identifier.map(str::trim).filter(|s| !s.is_empty());
        match identifier {
            None => {
                let id = ConversationId::generate();
                self.get_or_insert(&id).await;
                debug!(conversation = %id, "Created conversation");
                Ok((id, true))
            }
            Some(raw) => {
                let id = ConversationId::from(raw);
                if self.get(&id).await.is_none() {
                    warn!(conversation = %id, "Unknown checkpoint id, starting empty conversation");
                    self.get_or_insert(&id).await;
                }
                Ok((id, false))
            }
        }
    }

    async fn append(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        let history = self.get_or_insert(id).await;
        let mut history = history.lock().await;
        let added = messages.len();
        history.extend(messages);
        debug!(conversation = %id, added, total = history.len(), "Appended messages");
        Ok(())
    }

    async fn history(&self, id: &ConversationId) -> Result<Vec<Message>> {
        match self.get(id).await {
            Some(history) => Ok(history.lock().await.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn contains(&self, id: &ConversationId) -> Result<bool> {
        Ok(self.conversations.read().await.contains_key(id))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.conversations.read().await.len())
    }
}
