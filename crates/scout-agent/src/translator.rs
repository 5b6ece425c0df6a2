//! Event stream translator: internal [`AgentEvent`]s to client [`WireEvent`]s.

use futures::{Stream, StreamExt, future, stream};
use serde::{Deserialize, Serialize};

use scout_core::conversation::ConversationId;
use scout_tools::WEB_SEARCH_TOOL;

use crate::AgentEvent;

/// One frame of the client protocol, encoded as `{"type": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// A new conversation was created for this request.
    Checkpoint { checkpoint_id: String },
    Content { content: String },
    SearchStart { query: String },
    /// `urls` is itself a JSON-encoded array of strings.
    SearchResults { urls: String },
    End,
}

impl WireEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// `data: <json>\n\n`
    pub fn to_sse_frame(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}

/// Stateless mapping from agent events to wire events.
#[derive(Debug, Clone)]
pub struct EventTranslator {
    search_tool: String,
}

impl Default for EventTranslator {
    fn default() -> Self {
        Self::new(WEB_SEARCH_TOOL)
    }
}

impl EventTranslator {
    pub fn new(search_tool: impl Into<String>) -> Self {
        Self {
            search_tool: search_tool.into(),
        }
    }

    /// The opening event of a run, if any.
    pub fn checkpoint(id: &ConversationId, is_new: bool) -> Option<WireEvent> {
        is_new.then(|| WireEvent::Checkpoint {
            checkpoint_id: id.to_string(),
        })
    }

    pub fn translate(&self, event: &AgentEvent) -> Option<WireEvent> {
        match event {
            AgentEvent::ContentDelta { text } => Some(WireEvent::Content {
                content: text.clone(),
            }),
            AgentEvent::ModelEnd { message } => {
                let call = message
                    .tool_calls
                    .iter()
                    .find(|c| c.name == self.search_tool)?;
                let query = call
                    .arguments
                    .get("query")
                    .and_then(|q| q.as_str())
                    .unwrap_or_default();
                Some(WireEvent::SearchStart {
                    query: query.to_string(),
                })
            }
            AgentEvent::ToolEnd { call, output } if call.name == self.search_tool => {
                let items = output.data.as_ref()?.as_array()?;
                let urls: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("url")?.as_str())
                    .collect();
                let urls = serde_json::to_string(&urls).ok()?;
                Some(WireEvent::SearchResults { urls })
            }
            _ => None,
        }
    }

    /// The complete wire sequence for one run: an optional checkpoint, the
    /// translated events in arrival order, then exactly one `end`.
    pub fn translate_stream<S>(
        self,
        id: &ConversationId,
        is_new: bool,
        events: S,
    ) -> impl Stream<Item = WireEvent> + Send + use<S>
    where
        S: Stream<Item = AgentEvent> + Send + 'static,
    {
        let start = Self::checkpoint(id, is_new);
        stream::iter(start)
            .chain(events.filter_map(move |event| future::ready(self.translate(&event))))
            .chain(stream::once(future::ready(WireEvent::End)))
    }
}
