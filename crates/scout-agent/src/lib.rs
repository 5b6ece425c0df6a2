//! Agent runtime: a two-node control graph over an LLM and its tools.
//!
//! [`AgentGraph`] alternates between a Model step and a ToolExec step until
//! the model stops asking for tools, emitting [`AgentEvent`]s as it goes.
//! [`EventTranslator`] turns those events into the client-facing
//! [`WireEvent`] protocol.

use serde::{Deserialize, Serialize};

use scout_core::types::{Message, ToolCall};
use scout_tools::ToolOutput;

pub mod graph;
pub mod translator;

pub use graph::{AgentGraph, GraphState, route};
pub use translator::{EventTranslator, WireEvent};

/// Internal events emitted by the graph during a run, in step order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Streaming text delta from the current Model step.
    ContentDelta { text: String },

    /// A Model step finished; its message has been appended to history.
    ModelEnd { message: Message },

    /// One tool call finished.
    ToolEnd { call: ToolCall, output: ToolOutput },

    /// Token usage reported by the provider for the last Model step.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// The run stopped early.
    Error { kind: String, message: String },
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools.
    #[default]
    Completed,
    /// `agent.max_cycles` Model steps ran without reaching an answer.
    CycleLimit,
    /// The caller went away.
    Cancelled,
}

/// Result of a completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Model steps executed.
    pub cycles: u32,
    pub tool_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub stop_reason: StopReason,
}
