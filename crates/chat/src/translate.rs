//! Streaming translator: relay increments → ordered response frames.

use std::pin::Pin;

use {
    futures::{Stream, StreamExt},
    tracing::warn,
};

use crate::error::ChatError;

/// Increments of one turn as produced by the engine.
pub type TurnStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// One frame of an incremental response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A content chunk, in production order.
    Delta(String),
    /// Empty final chunk carrying `finish_reason = "stop"`.
    Stop,
    /// The turn failed after streaming started.
    Error { message: String, kind: &'static str },
    /// End-of-stream marker.
    Done,
}

/// Map a turn stream to frames: one `Delta` per increment, then `Stop` and
/// `Done`. A failure yields `Error` and `Done` instead, and nothing after.
pub fn frames(mut turn: TurnStream) -> Pin<Box<dyn Stream<Item = Frame> + Send>> {
    Box::pin(async_stream::stream! {
        while let Some(item) = turn.next().await {
            match item {
                Ok(text) => yield Frame::Delta(text),
                Err(e) => {
                    warn!(error = %e, "turn failed mid-stream");
                    yield Frame::Error { message: e.to_string(), kind: e.kind() };
                    yield Frame::Done;
                    return;
                },
            }
        }
        yield Frame::Stop;
        yield Frame::Done;
    })
}
