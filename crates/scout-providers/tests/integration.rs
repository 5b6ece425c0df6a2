//! Provider integration tests against the live OpenAI API.
//!
//! These tests are skipped when the corresponding API key env var is not set.
//! Run with: `cargo test -p scout-providers --test integration`

use scout_core::types::Message;
use scout_providers::{CompletionRequest, Credentials, LlmProvider, OpenAiProvider, ToolDefinition};
use tokio_stream::StreamExt;

fn openai_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

fn request(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> CompletionRequest {
    CompletionRequest {
        model: "gpt-4o-mini".into(),
        messages,
        max_tokens: 100,
        temperature: Some(0.0),
        tools,
        system: Some("You are a helpful assistant. Follow instructions exactly.".into()),
    }
}

#[tokio::test]
async fn test_openai_streaming() {
    let Some(api_key) = openai_key() else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };

    let provider = OpenAiProvider::openai(None);
    let credentials = Credentials::ApiKey { api_key };
    let req = request(
        vec![Message::user("Reply with exactly the word 'hello'.")],
        vec![],
    );

    let stream = provider.stream(&req, &credentials).await;
    assert!(stream.is_ok(), "Stream creation failed: {:?}", stream.err());

    let mut stream = stream.unwrap();
    let mut text = String::new();
    let mut got_stop = false;
    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.expect("Stream chunk error");
        if let Some(delta) = &chunk.delta {
            text.push_str(delta);
        }
        got_stop |= chunk.stop_reason.is_some();
    }

    assert!(got_stop, "No stop reason received");
    assert!(
        text.to_lowercase().contains("hello"),
        "Expected 'hello' in response, got: {text}"
    );
}

#[tokio::test]
async fn test_openai_tool_call() {
    let Some(api_key) = openai_key() else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };

    let provider = OpenAiProvider::openai(None);
    let credentials = Credentials::ApiKey { api_key };
    let search = ToolDefinition {
        name: "web_search".into(),
        description: "Search the web for current information.".into(),
        parameters_schema: serde_json::json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        }),
    };
    let req = request(
        vec![Message::user(
            "Use the web_search tool to look up today's weather in Tokyo.",
        )],
        vec![search],
    );

    let mut stream = provider.stream(&req, &credentials).await.unwrap();
    let mut calls = Vec::new();
    while let Some(chunk_result) = stream.next().await {
        if let Some(call) = chunk_result.expect("Stream chunk error").tool_use {
            calls.push(call);
        }
    }

    assert!(!calls.is_empty(), "Expected a tool call");
    assert_eq!(calls[0].name, "web_search");
    let args: serde_json::Value = serde_json::from_str(&calls[0].input_json).unwrap();
    assert!(args["query"].is_string());
}

#[tokio::test]
async fn test_openai_model_list() {
    let Some(api_key) = openai_key() else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };

    let provider = OpenAiProvider::openai(None);
    let credentials = Credentials::ApiKey { api_key };

    let models = provider.list_models(&credentials).await;
    assert!(models.is_ok(), "Model list failed: {:?}", models.err());
    assert!(!models.unwrap().is_empty(), "No models returned");
}
