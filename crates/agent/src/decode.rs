//! Turns raw agent stdout into visible text increments.

use std::collections::HashMap;

use {serde_json::Value, tracing::debug};

use crate::format::{format_tool_result, format_tool_start};

/// Result of decoding one stdout line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub increments: Vec<String>,
    /// The agent reported the end of the turn.
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Text,
    Thinking,
    Tool,
    Raw,
}

/// Decoder for `--output-format stream-json --stream-partial-output`.
#[derive(Debug, Default)]
pub struct StreamJsonDecoder {
    segment: Option<Segment>,
    emitted_any: bool,
    /// Text emitted so far in the current assistant segment.
    segment_text: String,
    tool_count: usize,
    tool_numbers: HashMap<String, usize>,
}

impl StreamJsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_line(&mut self, line: &str) -> Decoded {
        let mut out = Decoded::default();
        let line = line.trim();
        if line.is_empty() {
            return out;
        }
        let event: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                debug!(line = %line.chars().take(100).collect::<String>(), "non-JSON agent output");
                self.emit(&mut out, Segment::Raw, format!("{line}\n"));
                return out;
            },
        };
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let subtype = event.get("subtype").and_then(Value::as_str);

        match event_type {
            "assistant" if event.get("timestamp_ms").is_some() => {
                let text = assistant_text(&event);
                if text.is_empty() {
                    return out;
                }
                if self.segment != Some(Segment::Text) {
                    self.segment_text.clear();
                }
                if text == self.segment_text {
                    debug!(chars = text.len(), "skipping replayed assistant delta");
                    return out;
                }
                self.segment_text.push_str(&text);
                self.emit(&mut out, Segment::Text, text);
            },
            "assistant" => debug!("final assistant message ignored"),
            "thinking" => {
                if subtype != Some("completed") {
                    self.emit(&mut out, Segment::Thinking, ".".to_string());
                }
            },
            "tool_call" => {
                let call_id = event.get("call_id").and_then(Value::as_str);
                let tool_call = event.get("tool_call").cloned().unwrap_or(Value::Null);
                let line = match subtype {
                    Some("started") => {
                        self.tool_count += 1;
                        if let Some(id) = call_id {
                            self.tool_numbers.insert(id.to_string(), self.tool_count);
                        }
                        format_tool_start(&tool_call, self.tool_count)
                    },
                    Some("completed") => {
                        let number = call_id.and_then(|id| self.tool_numbers.get(id).copied());
                        format_tool_result(&tool_call, number)
                    },
                    _ => None,
                };
                if let Some(line) = line {
                    self.emit(&mut out, Segment::Tool, line);
                }
            },
            "result" => {
                let duration_ms = event.get("duration_ms").and_then(Value::as_u64);
                debug!(duration_ms, "agent reported result");
                out.finished = true;
            },
            "system" => {
                let model = event.get("model").and_then(Value::as_str);
                debug!(subtype, model, "agent system event");
            },
            other => debug!(event_type = other, "skipping agent event"),
        }
        out
    }

    fn emit(&mut self, out: &mut Decoded, segment: Segment, text: String) {
        if self.segment != Some(segment) {
            if self.emitted_any {
                out.increments.push("\n".to_string());
            }
            self.segment = Some(segment);
        }
        self.emitted_any = true;
        out.increments.push(text);
    }
}

fn assistant_text(event: &Value) -> String {
    event
        .pointer("/message/content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Incremental UTF-8 decoder for `--output-format text`.
///
/// Bytes of a character split across reads are held back until complete.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + bytes` as forms complete characters.
    pub fn feed(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                },
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        // Incomplete trailing sequence: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        },
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        },
                    }
                },
            }
        }
        (!out.is_empty()).then_some(out)
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}
