//! The agent control graph.
//!
//! A run starts in [`GraphState::Model`] once the user message is stored.
//! Each Model step streams one assistant message; [`route`] then sends the
//! run to [`GraphState::ToolExec`] when the message asks for tools, or to
//! [`GraphState::Terminal`] when it doesn't. ToolExec always returns to Model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scout_core::config::{Config, UnknownToolPolicy};
use scout_core::conversation::{ConversationId, ConversationStore};
use scout_core::error::{Result, ScoutError};
use scout_core::types::{Message, ToolCall, ToolResult};
use scout_providers::{CompletionRequest, Credentials, LlmProvider, ToolDefinition, ToolUseChunk};
use scout_tools::{ToolContext, ToolOutput, ToolRegistry};

use crate::{AgentEvent, RunSummary, StopReason};

/// Where a run is in the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphState {
    Model,
    /// Tool calls from the latest assistant message, in emitted order.
    ToolExec(Vec<ToolCall>),
    Terminal,
}

/// Routing after a Model step.
pub fn route(message: &Message) -> GraphState {
    if message.has_tool_calls() {
        GraphState::ToolExec(message.tool_calls.clone())
    } else {
        GraphState::Terminal
    }
}

/// The model/tool loop with its collaborators injected.
pub struct AgentGraph {
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    tools: Arc<ToolRegistry>,
    config: Arc<Config>,
}

impl AgentGraph {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        credentials: Credentials,
        tools: Arc<ToolRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            provider,
            credentials,
            tools,
            config,
        }
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one turn on a background task.
    ///
    /// The returned receiver yields the run's events and closes when the run
    /// is over. A failed run reports itself as a final [`AgentEvent::Error`].
    pub fn spawn(
        self: &Arc<Self>,
        store: Arc<dyn ConversationStore>,
        id: ConversationId,
        user_text: String,
        cancel: CancellationToken,
    ) -> (
        mpsc::UnboundedReceiver<AgentEvent>,
        JoinHandle<Result<RunSummary>>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let graph = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let result = graph
                .run(store.as_ref(), &id, &user_text, &event_tx, &cancel)
                .await;
            if let Err(ref e) = result {
                error!(conversation = %id, kind = e.kind(), %e, "Agent run failed");
                let _ = event_tx.send(AgentEvent::Error {
                    kind: e.kind().into(),
                    message: e.to_string(),
                });
            }
            result
        });

        (event_rx, handle)
    }

    /// Append the user message and drive the graph to Terminal.
    pub async fn run(
        &self,
        store: &dyn ConversationStore,
        id: &ConversationId,
        user_text: &str,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let max_cycles = self.config.max_cycles();
        let mut summary = RunSummary::default();

        store.append(id, vec![Message::user(user_text)]).await?;
        info!(conversation = %id, provider = self.provider.id(), "Agent run started");

        let mut state = GraphState::Model;
        loop {
            // Pending tool calls are still answered after cancellation.
            if cancel.is_cancelled() && !matches!(state, GraphState::ToolExec(_)) {
                summary.stop_reason = StopReason::Cancelled;
                break;
            }

            state = match state {
                GraphState::Model => {
                    if summary.cycles >= max_cycles {
                        warn!(conversation = %id, max_cycles, "Cycle limit reached");
                        let _ = event_tx.send(AgentEvent::Error {
                            kind: "cycle_limit".into(),
                            message: format!("no final answer after {max_cycles} model steps"),
                        });
                        summary.stop_reason = StopReason::CycleLimit;
                        break;
                    }
                    summary.cycles += 1;
                    debug!(conversation = %id, cycle = summary.cycles, "Model step");

                    let history = store.history(id).await?;
                    let Some(message) = self
                        .model_step(history, event_tx, cancel, &mut summary)
                        .await?
                    else {
                        summary.stop_reason = StopReason::Cancelled;
                        break;
                    };

                    store.append(id, vec![message.clone()]).await?;
                    let next = route(&message);
                    let _ = event_tx.send(AgentEvent::ModelEnd { message });
                    next
                }
                GraphState::ToolExec(calls) => {
                    let results = self
                        .tool_step(id, &calls, event_tx, cancel, &mut summary)
                        .await;
                    if !results.is_empty() {
                        store.append(id, results).await?;
                    }
                    GraphState::Model
                }
                GraphState::Terminal => break,
            };
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            conversation = %id,
            cycles = summary.cycles,
            tool_calls = summary.tool_calls,
            stop_reason = ?summary.stop_reason,
            duration_ms = summary.duration_ms,
            "Agent run finished"
        );
        Ok(summary)
    }

    /// One Model step. `None` means the run was cancelled mid-step.
    async fn model_step(
        &self,
        history: Vec<Message>,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<Option<Message>> {
        let request = self.build_request(history);
        let secs = self.config.model_timeout_secs();
        let deadline = Duration::from_secs(secs);

        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            result = tokio::time::timeout(deadline, self.stream_model(&request, event_tx, summary)) => {
                match result {
                    Ok(message) => message.map(Some),
                    Err(_) => Err(ScoutError::ModelUnavailable(format!(
                        "model step timed out after {secs}s"
                    ))),
                }
            }
        }
    }

    fn build_request(&self, messages: Vec<Message>) -> CompletionRequest {
        let tools = self
            .tools
            .tools()
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters_schema: t.parameters_schema(),
            })
            .collect();

        CompletionRequest {
            model: self.config.default_model(),
            messages,
            max_tokens: self.config.max_tokens(),
            temperature: self.config.temperature(),
            tools,
            system: self.config.system_prompt(),
        }
    }

    /// Forward text deltas while folding the stream into one assistant message.
    async fn stream_model(
        &self,
        request: &CompletionRequest,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        summary: &mut RunSummary,
    ) -> Result<Message> {
        let mut stream = self
            .provider
            .stream(request, &self.credentials)
            .await
            .map_err(|e| ScoutError::ModelUnavailable(e.to_string()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ScoutError::ModelUnavailable(e.to_string()))?;

            if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                text.push_str(&delta);
                let _ = event_tx.send(AgentEvent::ContentDelta { text: delta });
            }

            if let Some(tool_use) = chunk.tool_use {
                tool_calls.push(parse_tool_call(tool_use)?);
            }

            if let Some(usage) = chunk.usage {
                let input_tokens = usage.input_tokens.unwrap_or(0);
                let output_tokens = usage.output_tokens.unwrap_or(0);
                summary.input_tokens += input_tokens;
                summary.output_tokens += output_tokens;
                let _ = event_tx.send(AgentEvent::Usage {
                    input_tokens,
                    output_tokens,
                });
            }
        }

        Ok(Message::assistant(text, tool_calls))
    }

    /// Execute every call in order and return the results as one batch.
    ///
    /// After cancellation the remaining calls are answered without running
    /// them, so every call in the batch still has a matching result.
    async fn tool_step(
        &self,
        id: &ConversationId,
        calls: &[ToolCall],
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Vec<Message> {
        let context = ToolContext {
            conversation_id: id.to_string(),
            config: Arc::clone(&self.config),
        };
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let outcome = if cancel.is_cancelled() {
                None
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    output = self.dispatch(call, &context) => Some(output),
                }
            };

            let output = match outcome {
                Some(Some(output)) => output,
                // Unknown tool under the skip policy.
                Some(None) => continue,
                None => {
                    results.push(Message::tool_result(ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        content: "Tool call cancelled".into(),
                    }));
                    continue;
                }
            };

            summary.tool_calls += 1;
            results.push(Message::tool_result(ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                content: output.content.clone(),
            }));
            let _ = event_tx.send(AgentEvent::ToolEnd {
                call: call.clone(),
                output,
            });
        }

        results
    }

    /// Look up and execute one call. `None` when the call is dropped.
    async fn dispatch(&self, call: &ToolCall, context: &ToolContext) -> Option<ToolOutput> {
        let Some(tool) = self.tools.get(&call.name) else {
            return match self.config.unknown_tool_policy() {
                UnknownToolPolicy::Report => {
                    warn!(tool = %call.name, call_id = %call.id, "Model requested an unknown tool");
                    Some(ToolOutput::error(
                        ScoutError::ToolNotFound(call.name.clone()).to_string(),
                    ))
                }
                UnknownToolPolicy::Skip => {
                    debug!(tool = %call.name, call_id = %call.id, "Skipping unknown tool");
                    None
                }
            };
        };

        info!(tool = %call.name, call_id = %call.id, "Executing tool");
        let secs = self.config.tool_timeout_secs();
        let execution = tool.execute(call.arguments.clone(), context);

        let output = match tokio::time::timeout(Duration::from_secs(secs), execution).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(%e, tool = %call.name, "Tool execution error");
                ToolOutput::error(ScoutError::ToolInvocation(e.to_string()).to_string())
            }
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = secs, "Tool call timed out");
                ToolOutput::error(
                    ScoutError::ToolInvocation(format!("{} timed out after {secs}s", call.name))
                        .to_string(),
                )
            }
        };
        Some(output)
    }
}

/// Turn a completed tool-use chunk into a [`ToolCall`].
///
/// Empty argument text means "no arguments". Calls without an id get a
/// generated one so results can still be linked back.
fn parse_tool_call(chunk: ToolUseChunk) -> Result<ToolCall> {
    let arguments = if chunk.input_json.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&chunk.input_json).map_err(|e| {
            ScoutError::ModelUnavailable(format!(
                "unparseable arguments for tool {}: {e}",
                chunk.name
            ))
        })?
    };

    let id = if chunk.id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        chunk.id
    };

    Ok(ToolCall {
        id,
        name: chunk.name,
        arguments,
    })
}
