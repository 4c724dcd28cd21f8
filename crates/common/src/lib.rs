//! Types shared by every relaygate crate.

pub mod message;
pub mod time;

pub use message::{ChatMessage, Role};
