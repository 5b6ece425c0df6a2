//! Core message model, config, errors, and conversation store for Scout.

pub mod config;
pub mod conversation;
pub mod conversation_store;
pub mod error;
pub mod types;
