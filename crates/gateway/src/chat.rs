use std::{convert::Infallible, sync::Arc};

use {
    axum::{
        Json,
        extract::{State, rejection::JsonRejection},
        response::{
            IntoResponse, Response,
            sse::{Event, KeepAlive, Sse},
        },
    },
    futures::StreamExt,
    relaygate_agent::to_cli_id,
    relaygate_chat::{ChatError, Frame, TurnRequest, TurnStream, frames},
    relaygate_common::time::now_secs,
    serde::Serialize,
    serde_json::json,
    tracing::{debug, info, warn},
};

use crate::{
    auth::ApiKey,
    error::ApiError,
    openai::{ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ModelList, completion_id},
    state::GatewayState,
};

// ── Models ───────────────────────────────────────────────────────────────────

pub async fn list_models(
    State(state): State<Arc<GatewayState>>,
    ApiKey(_): ApiKey,
) -> Json<ModelList> {
    let models = state.models.snapshot().await;
    Json(ModelList::from_entries(&models, now_secs()))
}

// ── Chat completions ─────────────────────────────────────────────────────────

pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    ApiKey(api_key): ApiKey,
    body: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.messages.is_empty() {
        return Err(ChatError::EmptyMessages.into());
    }

    if !state.models.contains(&request.model).await {
        if state.config.models.strict {
            return Err(ApiError::ModelNotFound(request.model));
        }
        debug!(model = %request.model, "model not in snapshot, passing through");
    }

    info!(
        model = %request.model,
        stream = request.stream,
        messages = request.messages.len(),
        "chat completion request"
    );

    let turn = TurnRequest {
        model: to_cli_id(&request.model).to_string(),
        api_key: Some(api_key),
        messages: request.chat_messages(),
    };

    if request.stream {
        let stream = state.engine.run_streaming(turn).await?;
        Ok(sse_response(request.model, stream))
    } else {
        let output = state.engine.run_buffered(turn).await?;
        debug!(
            session_id = %output.session_id,
            mode = output.mode.as_str(),
            chars = output.content.len(),
            "turn finished"
        );
        Ok(Json(ChatCompletion::new(request.model, output.content, now_secs())).into_response())
    }
}

// ── SSE ──────────────────────────────────────────────────────────────────────

fn sse_response(model: String, turn: TurnStream) -> Response {
    let id = completion_id();
    let created = now_secs();
    let events = frames(turn)
        .map(move |frame| Ok::<Event, Infallible>(frame_event(&id, created, &model, frame)));
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn frame_event(id: &str, created: u64, model: &str, frame: Frame) -> Event {
    match frame {
        Frame::Delta(text) => json_event(&ChatCompletionChunk::delta(id, created, model, text)),
        Frame::Stop => json_event(&ChatCompletionChunk::stop(id, created, model)),
        Frame::Error { message, kind } => json_event(&json!({
            "error": {
                "message": message,
                "type": kind,
            }
        })),
        Frame::Done => Event::default().data("[DONE]"),
    }
}

fn json_event<T: Serialize>(value: &T) -> Event {
    Event::default().json_data(value).unwrap_or_else(|e| {
        warn!(error = %e, "failed to encode stream frame");
        Event::default().comment("encode error")
    })
}
