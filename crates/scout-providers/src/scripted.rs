//! Scripted provider that replays canned turns and records every request.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{ChunkStream, CompletionChunk, CompletionRequest, Credentials, LlmProvider, ModelInfo};

/// One model turn.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Stream these chunks, then end.
    Chunks(Vec<CompletionChunk>),
    /// Fail before streaming anything.
    Fail(String),
    /// Stream these chunks, then error mid-stream.
    BreakAfter(Vec<CompletionChunk>, String),
    /// Never produce anything.
    Stall,
}

impl ScriptedTurn {
    /// A plain text answer split into the given deltas.
    pub fn text(deltas: &[&str]) -> Self {
        let mut chunks: Vec<CompletionChunk> =
            deltas.iter().map(|d| CompletionChunk::text(*d)).collect();
        chunks.push(CompletionChunk::stop("stop"));
        Self::Chunks(chunks)
    }

    /// Optional text followed by tool calls given as `(id, name, arguments_json)`.
    pub fn tool_calls(deltas: &[&str], calls: &[(&str, &str, &str)]) -> Self {
        let mut chunks: Vec<CompletionChunk> =
            deltas.iter().map(|d| CompletionChunk::text(*d)).collect();
        for (id, name, args) in calls {
            chunks.push(CompletionChunk::tool_use(*id, *name, *args));
        }
        chunks.push(CompletionChunk::stop("tool_calls"));
        Self::Chunks(chunks)
    }
}

#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let turn = self
            .turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match turn {
            None => anyhow::bail!("script exhausted"),
            Some(ScriptedTurn::Fail(reason)) => anyhow::bail!(reason),
            Some(ScriptedTurn::Chunks(chunks)) => {
                Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
            }
            Some(ScriptedTurn::BreakAfter(chunks, reason)) => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(anyhow::anyhow!(reason))));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(ScriptedTurn::Stall) => Ok(Box::pin(futures::stream::pending())),
        }
    }

    async fn list_models(&self, _credentials: &Credentials) -> anyhow::Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted".into(),
            name: "Scripted".into(),
        }])
    }
}
