//! Gateway shared state.

use std::sync::Arc;
use std::time::Instant;

use scout_agent::{AgentGraph, EventTranslator};
use scout_core::config::Config;
use scout_core::conversation::ConversationStore;

/// Shared state handed to every request handler.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversationStore>,
    pub graph: Arc<AgentGraph>,
    pub translator: EventTranslator,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ConversationStore>,
        graph: Arc<AgentGraph>,
    ) -> Self {
        Self {
            config,
            store,
            graph,
            translator: EventTranslator::default(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
