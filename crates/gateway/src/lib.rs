//! Gateway: OpenAI-compatible HTTP surface over the chat engine.
//!
//! Lifecycle:
//! 1. Load config and apply environment overrides (in the binary)
//! 2. Open the session store and model snapshot
//! 3. Serve `/health`, `/v1/models`, `/v1/chat/completions`
//!
//! Turn logic lives in `relaygate-chat`; this crate only authenticates,
//! parses, and frames.

pub mod auth;
pub mod chat;
pub mod error;
pub mod openai;
pub mod server;
pub mod state;

pub use {
    error::ApiError,
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
