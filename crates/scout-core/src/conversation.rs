//! Conversation model: checkpoint identifiers and the store contract.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Message;

/// Opaque identifier of a conversation (the client-facing `checkpoint_id`).
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// A fresh, globally unique identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage backend for conversation history.
///
/// Implementations must serialize appends to the same identifier so that
/// history order equals append order.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Look up the conversation for `identifier`, creating it if needed.
    ///
    /// Returns `is_new = true` only when no identifier was supplied and a
    /// fresh one was generated.
    async fn resolve_or_create(&self, identifier: Option<&str>) -> Result<(ConversationId, bool)>;

    /// Append messages, in order, to the end of the history.
    async fn append(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()>;

    /// Snapshot of the full history. Unknown identifiers yield an empty history.
    async fn history(&self, id: &ConversationId) -> Result<Vec<Message>>;

    async fn contains(&self, id: &ConversationId) -> Result<bool>;

    /// Number of conversations held.
    async fn count(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ConversationId::generate();
        let b = ConversationId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = ConversationId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""abc""#);
        assert_eq!(id.to_string(), "abc");
    }
}
