//! OpenAI chat-completions wire types.

use {
    relaygate_agent::{ModelEntry, to_display_id},
    relaygate_common::{ChatMessage, Role},
    serde::{Deserialize, Serialize},
};

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<RequestMessage>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Messages with content flattened to text. Image parts stay attached
    /// to user messages and are dropped elsewhere.
    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|m| {
                let msg = ChatMessage::new(m.role, m.text());
                match m.role {
                    Role::User => msg.with_images(m.image_urls()),
                    Role::System | Role::Assistant => msg,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

impl RequestMessage {
    pub fn text(&self) -> String {
        match &self.content {
            Some(content) => content.text(),
            None => String::new(),
        }
    }

    /// URL of every image part; empty when a part carries none.
    pub fn image_urls(&self) -> Vec<String> {
        match &self.content {
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter(|p| p.kind == "image_url")
                .map(|p| {
                    p.image_url
                        .as_ref()
                        .map(|image| image.url.clone())
                        .unwrap_or_default()
                })
                .collect(),
            Some(MessageContent::Text(_)) | None => Vec::new(),
        }
    }
}

/// Either a plain string or a list of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Text parts joined by newlines. Other part types are dropped.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<ImageUrl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
    #[serde(default)]
    pub url: String,
}

// ── Responses ────────────────────────────────────────────────────────────────

pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4())
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
}

impl ChatCompletion {
    pub fn new(model: String, content: String, created: u64) -> Self {
        Self {
            id: completion_id(),
            object: "chat.completion",
            created,
            model,
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(content),
                finish_reason: "stop",
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    fn new(id: &str, created: u64, model: &str, choice: ChunkChoice) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![choice],
        }
    }

    /// One content increment.
    pub fn delta(id: &str, created: u64, model: &str, content: String) -> Self {
        Self::new(id, created, model, ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                content: Some(content),
            },
            finish_reason: None,
        })
    }

    /// Final chunk: empty delta, `finish_reason = "stop"`.
    pub fn stop(id: &str, created: u64, model: &str) -> Self {
        Self::new(id, created, model, ChunkChoice {
            index: 0,
            delta: ChunkDelta::default(),
            finish_reason: Some("stop"),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// ── Models ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    pub fn from_entries(entries: &[ModelEntry], created: u64) -> Self {
        Self {
            object: "list",
            data: entries
                .iter()
                .map(|entry| ModelCard {
                    id: to_display_id(&entry.id),
                    object: "model",
                    created,
                    owned_by: entry.owned_by.clone(),
                    name: entry.name.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCard {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub owned_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
