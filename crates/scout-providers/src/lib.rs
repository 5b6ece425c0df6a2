//! LLM provider abstraction.
//!
//! A provider turns an ordered message history into a lazy stream of
//! [`CompletionChunk`]s: text deltas while the model is talking, then any
//! completed tool calls and a stop reason.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use scout_core::config::Config;
use scout_core::types::Message;

pub mod openai;
#[cfg(feature = "testing")]
pub mod scripted;
pub mod sse;

pub use openai::OpenAiProvider;

/// Credentials for authenticating with an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
    /// Local endpoints (e.g. Ollama) that need no auth.
    #[serde(rename = "none")]
    None,
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A request to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolDefinition>,
    pub system: Option<String>,
}

/// A streamed chunk from the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub delta: Option<String>,
    pub tool_use: Option<ToolUseChunk>,
    pub usage: Option<ChunkUsage>,
    pub stop_reason: Option<String>,
}

impl CompletionChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            ..Self::default()
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input_json: impl Into<String>) -> Self {
        Self {
            tool_use: Some(ToolUseChunk {
                id: id.into(),
                name: name.into(),
                input_json: input_json.into(),
            }),
            ..Self::default()
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            stop_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// A fully assembled tool call. Arguments stay raw JSON text until the
/// caller parses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseChunk {
    pub id: String,
    pub name: String,
    pub input_json: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Model metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<CompletionChunk>> + Send>>;

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "openai", "ollama").
    fn id(&self) -> &str;

    /// Stream a chat completion.
    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream>;

    /// List available models from this provider.
    async fn list_models(&self, credentials: &Credentials) -> anyhow::Result<Vec<ModelInfo>>;
}

/// Build the configured provider (first entry of `models.providers`), or
/// OpenAI with `OPENAI_API_KEY` when none is configured.
pub fn from_config(config: &Config) -> anyhow::Result<(Box<dyn LlmProvider>, Credentials)> {
    let Some(pc) = config.first_provider() else {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("No provider configured and OPENAI_API_KEY is not set"))?;
        return Ok((
            Box::new(OpenAiProvider::openai(None)),
            Credentials::ApiKey { api_key },
        ));
    };

    let base_url = pc.base_url.as_deref();
    let provider = match pc.id.as_str() {
        "openai" => OpenAiProvider::openai(base_url),
        "openrouter" => OpenAiProvider::openrouter(base_url),
        "ollama" => OpenAiProvider::ollama(base_url),
        other => anyhow::bail!("Unsupported provider: {other}"),
    };

    let credentials = match pc.resolve_api_key() {
        Some(api_key) => Credentials::ApiKey { api_key },
        None if pc.id == "ollama" => Credentials::None,
        None => anyhow::bail!("Provider '{}' has no API key configured", pc.id),
    };

    Ok((Box::new(provider), credentials))
}
