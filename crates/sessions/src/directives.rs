//! `<workspace>` and `<session_id>` tags embedded in system prompts.

use std::sync::OnceLock;

use {
    regex::Regex,
    relaygate_common::{ChatMessage, Role},
    tracing::debug,
};

#[allow(clippy::expect_used)]
fn workspace_tag() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?s)<workspace>\s*(.+?)\s*</workspace>").expect("workspace regex must compile")
    })
}

#[allow(clippy::expect_used)]
fn session_id_tag() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?s)<session_id>\s*(.+?)\s*</session_id>")
            .expect("session_id regex must compile")
    })
}

/// Values found in the system messages of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    /// Raw, unvalidated workspace path.
    pub workspace: Option<String>,
    pub session_id: Option<String>,
}

/// Remove directive tags from every system message and return the cleaned
/// messages plus the first value of each tag. User and assistant messages
/// are passed through untouched.
pub fn extract_directives(messages: &[ChatMessage]) -> (Directives, Vec<ChatMessage>) {
    let mut directives = Directives::default();
    let cleaned = messages
        .iter()
        .map(|msg| {
            if msg.role != Role::System {
                return msg.clone();
            }
            let mut content = msg.content.clone();
            if let Some(value) = take_tag(workspace_tag(), &mut content) {
                debug!(workspace = %value, "workspace directive found");
                directives.workspace.get_or_insert(value);
            }
            if let Some(value) = take_tag(session_id_tag(), &mut content) {
                debug!(session_id = %value, "session_id directive found");
                directives.session_id.get_or_insert(value);
            }
            ChatMessage::new(Role::System, content)
        })
        .collect();
    (directives, cleaned)
}

/// First tag value, with every occurrence stripped and the rest trimmed.
fn take_tag(re: &Regex, content: &mut String) -> Option<String> {
    let value = re
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())?;
    let stripped = re.replace_all(content, "").trim().to_string();
    *content = stripped;
    Some(value).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_both_tags_from_system_prompt() {
        let messages = vec![
            ChatMessage::system(
                "You are helpful.\n<workspace> /home/user/proj </workspace>\n<session_id>abc-1</session_id>",
            ),
            ChatMessage::user("hi"),
        ];
        let (directives, cleaned) = extract_directives(&messages);
        assert_eq!(directives.workspace.as_deref(), Some("/home/user/proj"));
        assert_eq!(directives.session_id.as_deref(), Some("abc-1"));
        assert_eq!(cleaned[0].content, "You are helpful.");
        assert_eq!(cleaned[1], messages[1]);
    }

    #[test]
    fn tags_outside_system_messages_are_left_alone() {
        let messages = vec![ChatMessage::user("<session_id>abc</session_id> hello")];
        let (directives, cleaned) = extract_directives(&messages);
        assert_eq!(directives, Directives::default());
        assert_eq!(cleaned, messages);
    }

    #[test]
    fn multiline_value_and_first_match_wins() {
        let messages = vec![
            ChatMessage::system("<session_id>\n  first\n</session_id>"),
            ChatMessage::system("<session_id>second</session_id>rest"),
        ];
        let (directives, cleaned) = extract_directives(&messages);
        assert_eq!(directives.session_id.as_deref(), Some("first"));
        assert_eq!(cleaned[0].content, "");
        assert_eq!(cleaned[1].content, "rest");
    }

    #[test]
    fn no_tags_keeps_content_verbatim() {
        let messages = vec![ChatMessage::system("  spaced  ")];
        let (_, cleaned) = extract_directives(&messages);
        assert_eq!(cleaned[0].content, "  spaced  ");
    }
}
