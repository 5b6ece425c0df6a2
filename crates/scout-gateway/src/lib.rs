//! HTTP gateway for the research assistant.
//!
//! Exposes a health probe and a streaming chat endpoint. Each chat request
//! spawns one agent run and relays its events as server-sent events.

pub mod chat;
pub mod server;
pub mod state;

pub use server::{build_router, start_gateway};
pub use state::GatewayState;
