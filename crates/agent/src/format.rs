//! One-line summaries of the agent's tool calls.

use serde_json::Value;

const WRITE: &str = "writeToolCall";
const READ: &str = "readToolCall";
const GREP: &str = "grepToolCall";
const SHELL: &str = "shellToolCall";
const MCP: &str = "mcpToolCall";

static NULL: Value = Value::Null;

fn str_field<'a>(v: &'a Value, key: &str, default: &'a str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn u64_field(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn i64_field(v: &Value, key: &str) -> i64 {
    v.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max - 3).collect();
    format!("{kept}...")
}

/// First (and only) `{"<kind>ToolCall": {...}}` entry.
fn call_kind(tool_call: &Value) -> Option<(&str, &Value)> {
    tool_call
        .as_object()?
        .iter()
        .next()
        .map(|(k, v)| (k.as_str(), v))
}

fn icon(kind: &str) -> &'static str {
    match kind {
        WRITE => "🖊️",
        READ => "📖",
        GREP => "🔍",
        SHELL => "💻",
        MCP => "🔌",
        _ => "🔨",
    }
}

/// Summary line for a `tool_call` event with `subtype = "started"`.
pub fn format_tool_start(tool_call: &Value, number: usize) -> Option<String> {
    let (kind, body) = call_kind(tool_call)?;
    let args = body.get("args").unwrap_or(&NULL);
    let path = str_field(args, "path", "unknown");
    let detail = match kind {
        WRITE => format!("Creating {path}"),
        READ => {
            let offset = args.get("offset").filter(|v| !v.is_null());
            let limit = args.get("limit").filter(|v| !v.is_null());
            if offset.is_some() || limit.is_some() {
                let show = |v: Option<&Value>| v.map_or_else(|| "none".to_string(), Value::to_string);
                format!("Reading {path} (offset={}, limit={})", show(offset), show(limit))
            } else {
                format!("Reading {path}")
            }
        },
        GREP => format!(
            "Grep '{}' in {path}",
            truncate(str_field(args, "pattern", ""), 50)
        ),
        SHELL => format!("Shell `{}`", truncate(str_field(args, "command", ""), 60)),
        MCP => format!(
            "MCP {}-{}",
            str_field(args, "providerIdentifier", "unknown"),
            str_field(args, "name", "unknown")
        ),
        other => other.to_string(),
    };
    Some(format!("{} Tool #{number}: {detail}\n", icon(kind)))
}

/// Summary line for a `tool_call` event with `subtype = "completed"`.
pub fn format_tool_result(tool_call: &Value, number: Option<usize>) -> Option<String> {
    let (kind, body) = call_kind(tool_call)?;
    let result = body.get("result")?;
    let prefix = number.map(|n| format!("Tool #{n}: ")).unwrap_or_default();

    let detail = if let Some(error) = result.get("error") {
        format!("Error: {}", str_field(error, "message", "Unknown error"))
    } else if let Some(rejected) = result.get("rejected") {
        format!("Rejected: {}", str_field(rejected, "reason", "Unknown reason"))
    } else {
        let success = result.get("success")?;
        match kind {
            WRITE => format!(
                "Created {} lines ({} bytes)",
                u64_field(success, "linesCreated"),
                u64_field(success, "fileSize")
            ),
            READ => {
                let total = u64_field(success, "totalLines");
                let read = u64_field(success, "linesRead");
                if read != 0 && read != total {
                    format!("Read {read}/{total} lines")
                } else {
                    format!("Read {total} lines")
                }
            },
            GREP => format!(
                "Found {} matches in {} lines",
                u64_field(success, "matchCount"),
                u64_field(success, "lineCount")
            ),
            SHELL => match i64_field(success, "exitCode") {
                0 => "Command completed (exit code: 0)".to_string(),
                code => format!("Command failed (exit code: {code})"),
            },
            _ => "Completed".to_string(),
        }
    };
    Some(format!("{} {prefix}{detail}\n", icon(kind)))
}
