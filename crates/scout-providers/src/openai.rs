//! OpenAI Chat Completions API provider.
//!
//! Streams `/v1/chat/completions`. Also serves OpenRouter and Ollama, which
//! speak the same protocol.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use scout_core::types::{Message, Role};

use crate::sse::{SseEvent, parse_sse_stream};
use crate::{
    ChunkStream, ChunkUsage, CompletionChunk, CompletionRequest, Credentials, LlmProvider,
    ModelInfo, ToolDefinition,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// API style; determines minor behavior differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    OpenAi,
    OpenRouter,
    Ollama,
}

pub struct OpenAiProvider {
    pub base_url: String,
    pub api_style: ApiStyle,
    provider_id: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    fn with_style(base_url: Option<&str>, default_url: &str, api_style: ApiStyle, id: &str) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(default_url)
                .trim_end_matches('/')
                .to_string(),
            api_style,
            provider_id: id.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn openai(base_url: Option<&str>) -> Self {
        Self::with_style(base_url, OPENAI_BASE_URL, ApiStyle::OpenAi, "openai")
    }

    pub fn openrouter(base_url: Option<&str>) -> Self {
        Self::with_style(base_url, OPENROUTER_BASE_URL, ApiStyle::OpenRouter, "openrouter")
    }

    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::with_style(base_url, OLLAMA_BASE_URL, ApiStyle::Ollama, "ollama")
    }

    fn authorize(
        &self,
        builder: reqwest::RequestBuilder,
        credentials: &Credentials,
    ) -> anyhow::Result<reqwest::RequestBuilder> {
        let builder = match (self.api_style, credentials) {
            (ApiStyle::Ollama, _) => builder,
            (_, Credentials::ApiKey { api_key }) => {
                builder.header("authorization", format!("Bearer {api_key}"))
            }
            (_, Credentials::None) => {
                anyhow::bail!("{} requires ApiKey credentials", self.provider_id)
            }
        };
        Ok(builder)
    }

    pub fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    pub fn format_messages(&self, history: &[Message]) -> Vec<serde_json::Value> {
        history
            .iter()
            .map(|msg| match msg.role {
                Role::System => json!({ "role": "system", "content": msg.content }),
                Role::User => json!({ "role": "user", "content": msg.content }),
                Role::Assistant => {
                    let mut out = json!({ "role": "assistant" });
                    if !msg.content.is_empty() || msg.tool_calls.is_empty() {
                        out["content"] = json!(msg.content);
                    }
                    if !msg.tool_calls.is_empty() {
                        let calls: Vec<serde_json::Value> = msg
                            .tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments.to_string(),
                                    }
                                })
                            })
                            .collect();
                        out["tool_calls"] = json!(calls);
                    }
                    out
                }
                Role::Tool => json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id,
                    "content": msg.content,
                }),
            })
            .collect()
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    /// Set when the upstream fails mid-stream.
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Accumulates tool call data across streaming deltas.
#[derive(Debug, Clone, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Folds raw SSE payloads into [`CompletionChunk`]s.
///
/// Tool call fragments are accumulated per index and released, in index
/// order, when the choice finishes or the stream ends.
#[derive(Debug, Default)]
struct ChunkAssembler {
    tool_calls: Vec<ToolCallAccumulator>,
    pending: VecDeque<CompletionChunk>,
    /// A `finish_reason` or `[DONE]` has been seen.
    completed: bool,
    finished: bool,
}

impl ChunkAssembler {
    fn accept(&mut self, data: &str) -> anyhow::Result<()> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(());
        }
        if data == "[DONE]" {
            self.flush_tool_calls();
            self.completed = true;
            self.finished = true;
            return Ok(());
        }

        let chunk: ChatCompletionChunk = serde_json::from_str(data).map_err(|e| {
            trace!(%e, data, "Failed to parse OpenAI chunk");
            anyhow::anyhow!("Malformed OpenAI stream chunk: {e}")
        })?;

        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            anyhow::bail!("OpenAI stream error: {message}");
        }

        if let Some(usage) = chunk.usage {
            self.pending.push_back(CompletionChunk {
                usage: Some(ChunkUsage {
                    input_tokens: Some(usage.prompt_tokens),
                    output_tokens: Some(usage.completion_tokens),
                }),
                ..CompletionChunk::default()
            });
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(());
        };

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            if self.tool_calls.len() <= tc.index {
                self.tool_calls.resize_with(tc.index + 1, ToolCallAccumulator::default);
            }
            let acc = &mut self.tool_calls[tc.index];
            if let Some(id) = tc.id {
                acc.id = id;
            }
            if let Some(f) = tc.function {
                if let Some(name) = f.name {
                    acc.name = name;
                }
                if let Some(args) = f.arguments {
                    acc.arguments.push_str(&args);
                }
            }
        }

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            self.pending.push_back(CompletionChunk::text(content));
        }

        if let Some(reason) = choice.finish_reason {
            self.flush_tool_calls();
            self.completed = true;
            self.pending.push_back(CompletionChunk::stop(reason));
        }
        Ok(())
    }

    /// Called when the SSE body closes.
    fn close(&mut self) -> anyhow::Result<()> {
        self.finished = true;
        if !self.completed {
            self.tool_calls.clear();
            anyhow::bail!("OpenAI stream closed before the response finished");
        }
        self.flush_tool_calls();
        Ok(())
    }

    fn flush_tool_calls(&mut self) {
        for tc in self.tool_calls.drain(..) {
            self.pending
                .push_back(CompletionChunk::tool_use(tc.id, tc.name, tc.arguments));
        }
    }
}

struct OpenAiChunkState {
    sse: Pin<Box<dyn Stream<Item = anyhow::Result<SseEvent>> + Send>>,
    assembler: ChunkAssembler,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream> {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(self.format_messages(&request.messages));

        let body = OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            stream: true,
            temperature: request.temperature,
            tools: self.format_tools(&request.tools),
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };

        debug!(model = %body.model, base_url = %self.base_url, "Streaming OpenAI-compatible API");

        let mut req_builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");
        req_builder = self.authorize(req_builder, credentials)?;
        if self.api_style == ApiStyle::OpenRouter {
            req_builder = req_builder.header("X-Title", "Scout");
        }

        let response = req_builder.json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {status}: {body}");
        }

        let chunk_stream = futures::stream::unfold(
            OpenAiChunkState {
                sse: Box::pin(parse_sse_stream(response)),
                assembler: ChunkAssembler::default(),
            },
            |mut state| async move {
                loop {
                    if let Some(chunk) = state.assembler.pending.pop_front() {
                        return Some((Ok(chunk), state));
                    }
                    if state.assembler.finished {
                        return None;
                    }
                    match state.sse.next().await {
                        Some(Ok(event)) => {
                            if let Err(e) = state.assembler.accept(&event.data) {
                                state.assembler.finished = true;
                                return Some((Err(e), state));
                            }
                        }
                        Some(Err(e)) => {
                            state.assembler.finished = true;
                            return Some((Err(e), state));
                        }
                        None => {
                            if let Err(e) = state.assembler.close() {
                                return Some((Err(e), state));
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunk_stream))
    }

    async fn list_models(&self, credentials: &Credentials) -> anyhow::Result<Vec<ModelInfo>> {
        let req = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("content-type", "application/json");
        let req = self.authorize(req, credentials)?;

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to list models {status}: {body}");
        }

        let body: ModelsResponse = response.json().await?;
        Ok(body
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id.clone(),
                id: m.id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::types::{ToolCall, ToolResult};

    fn drain(assembler: &mut ChunkAssembler) -> Vec<CompletionChunk> {
        assembler.pending.drain(..).collect()
    }

    #[test]
    fn test_provider_creation() {
        let provider = OpenAiProvider::openai(None);
        assert_eq!(provider.id(), "openai");
        assert_eq!(provider.base_url, OPENAI_BASE_URL);
        assert_eq!(OpenAiProvider::openrouter(None).base_url, OPENROUTER_BASE_URL);
        assert_eq!(OpenAiProvider::ollama(None).id(), "ollama");
    }

    #[test]
    fn test_custom_base_url() {
        let provider = OpenAiProvider::openai(Some("https://my-proxy.example.com/"));
        assert_eq!(provider.base_url, "https://my-proxy.example.com");
    }

    #[test]
    fn test_format_tools_function_wrapper() {
        let provider = OpenAiProvider::openai(None);
        let tools = vec![ToolDefinition {
            name: "web_search".into(),
            description: "Search the web".into(),
            parameters_schema: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
            }),
        }];
        let formatted = provider.format_tools(&tools);
        assert_eq!(formatted.len(), 1);
        assert_eq!(formatted[0]["type"], "function");
        assert_eq!(formatted[0]["function"]["name"], "web_search");
        assert!(formatted[0]["function"]["parameters"].is_object());
    }

    #[test]
    fn test_format_messages_with_tool_round_trip() {
        let provider = OpenAiProvider::openai(None);
        let history = vec![
            Message::user("Weather in Tokyo?"),
            Message::assistant(
                "",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "web_search".into(),
                    arguments: json!({"query": "weather in Tokyo"}),
                }],
            ),
            Message::tool_result(ToolResult {
                tool_call_id: "call_1".into(),
                name: "web_search".into(),
                content: "[]".into(),
            }),
            Message::assistant("Sunny.", vec![]),
        ];

        let messages = provider.format_messages(&history);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert!(messages[1].get("content").is_none());
        assert_eq!(messages[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            messages[1]["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"weather in Tokyo"}"#
        );
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
        assert_eq!(messages[3]["content"], "Sunny.");
    }

    #[test]
    fn test_assembler_text_deltas() {
        let mut asm = ChunkAssembler::default();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#).unwrap();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}"#).unwrap();
        asm.accept(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        asm.accept("[DONE]").unwrap();

        let chunks = drain(&mut asm);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].delta.as_deref(), Some("Hel"));
        assert_eq!(chunks[1].delta.as_deref(), Some("lo"));
        assert_eq!(chunks[2].stop_reason.as_deref(), Some("stop"));
        assert!(asm.finished);
    }

    #[test]
    fn test_assembler_emits_every_tool_call_in_order() {
        let mut asm = ChunkAssembler::default();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"web_search","arguments":""}}]}}]}"#).unwrap();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"web_search","arguments":"{\"query\":"}}]}}]}"#).unwrap();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":\"a\"}"}}]}}]}"#).unwrap();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"function":{"arguments":"\"b\"}"}}]}}]}"#).unwrap();
        asm.accept(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#).unwrap();

        let chunks = drain(&mut asm);
        assert_eq!(chunks.len(), 3);
        let first = chunks[0].tool_use.as_ref().unwrap();
        assert_eq!(first.id, "call_a");
        assert_eq!(first.input_json, r#"{"query":"a"}"#);
        let second = chunks[1].tool_use.as_ref().unwrap();
        assert_eq!(second.id, "call_b");
        assert_eq!(second.input_json, r#"{"query":"b"}"#);
        assert_eq!(chunks[2].stop_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_assembler_usage() {
        let mut asm = ChunkAssembler::default();
        asm.accept(r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#).unwrap();
        let chunks = drain(&mut asm);
        assert_eq!(chunks.len(), 1);
        let usage = chunks[0].usage.as_ref().unwrap();
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(3));
    }

    #[test]
    fn test_assembler_rejects_malformed_payload() {
        let mut asm = ChunkAssembler::default();
        let err = asm.accept("this is not json").unwrap_err();
        assert!(err.to_string().contains("Malformed"));
        assert!(asm.pending.is_empty());
    }

    #[test]
    fn test_assembler_rejects_error_object() {
        let mut asm = ChunkAssembler::default();
        let err = asm
            .accept(r#"{"error":{"message":"The server is overloaded"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("The server is overloaded"));
        assert!(asm.pending.is_empty());
    }

    #[test]
    fn test_assembler_truncated_stream_is_an_error() {
        let mut asm = ChunkAssembler::default();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#).unwrap();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"web_search","arguments":"{"}}]}}]}"#).unwrap();
        assert!(asm.close().is_err());
        assert!(asm.finished);

        let chunks = drain(&mut asm);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].tool_use.is_none());
    }

    #[test]
    fn test_assembler_close_after_finish_reason() {
        let mut asm = ChunkAssembler::default();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":"stop"}]}"#).unwrap();
        assert!(asm.close().is_ok());
        assert_eq!(drain(&mut asm).len(), 2);
    }

    #[test]
    fn test_assembler_flushes_tool_calls_on_done() {
        let mut asm = ChunkAssembler::default();
        asm.accept(r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"web_search","arguments":"{}"}}]}}]}"#).unwrap();
        asm.accept("[DONE]").unwrap();
        let chunks = drain(&mut asm);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].tool_use.as_ref().unwrap().id, "call_1");
    }

    #[test]
    fn test_ollama_skips_auth() {
        let provider = OpenAiProvider::ollama(None);
        let builder = provider.client.get("http://localhost");
        assert!(provider.authorize(builder, &Credentials::None).is_ok());

        let openai = OpenAiProvider::openai(None);
        let builder = openai.client.get("http://localhost");
        assert!(openai.authorize(builder, &Credentials::None).is_err());
    }
}
