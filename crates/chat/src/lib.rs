//! Chat turn engine: maps OpenAI-style histories onto resumable agent
//! sessions and translates the agent's output into response frames.

pub mod engine;
pub mod error;
pub mod translate;

pub use {
    engine::{ChatEngine, TurnOutput, TurnRequest},
    error::ChatError,
    translate::{Frame, TurnStream, frames},
};
