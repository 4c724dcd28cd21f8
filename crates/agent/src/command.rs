//! Argument vectors for the agent binary.

use std::path::{Path, PathBuf};

use {
    relaygate_common::{ChatMessage, Role},
    relaygate_config::{AgentConfig, OutputFormat},
    tracing::debug,
};

use crate::{
    error::RelayError,
    slash::{SlashCommands, user_home},
    upload::ContentSpiller,
};

/// How much context a turn sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// The session has no context yet: send the full history.
    New,
    /// The session already holds the history: send only the newest message.
    Resume,
}

impl InvocationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Resume => "resume",
        }
    }
}

/// Everything needed to run one turn.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub mode: InvocationMode,
    /// Model id in the agent's own naming.
    pub model: String,
    pub api_key: Option<String>,
    pub session_id: String,
    pub workspace: PathBuf,
    /// Cleaned request history; `mode` decides how much of it is sent.
    pub messages: Vec<ChatMessage>,
}

impl Invocation {
    /// Messages actually forwarded for this mode.
    pub fn payload(&self) -> &[ChatMessage] {
        match self.mode {
            InvocationMode::New => &self.messages,
            InvocationMode::Resume => match self.messages.split_last() {
                Some((last, _)) => std::slice::from_ref(last),
                None => &[],
            },
        }
    }
}

/// Builds argv for `create-chat` and for turns.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    config: AgentConfig,
    spiller: ContentSpiller,
    /// User-level root for slash command definitions.
    home: Option<PathBuf>,
}

impl CommandBuilder {
    pub fn new(config: AgentConfig, spiller: ContentSpiller) -> Self {
        Self {
            config,
            spiller,
            home: user_home(),
        }
    }

    /// Look for user-level slash commands under `home` instead of the
    /// current user's home directory.
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn binary(&self) -> &str {
        &self.config.binary
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// `create-chat --workspace <dir> [--sandbox enabled] [--api-key <key>]`
    pub fn create_chat_args(&self, workspace: &Path, api_key: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "create-chat".to_string(),
            "--workspace".to_string(),
            workspace.display().to_string(),
        ];
        if self.config.sandbox {
            args.extend(["--sandbox".to_string(), "enabled".to_string()]);
        }
        if let Some(key) = api_key {
            args.extend(["--api-key".to_string(), key.to_string()]);
        }
        args
    }

    /// Full argument list for one turn, prompt last.
    pub fn turn_args(&self, invocation: &Invocation) -> Result<Vec<String>, RelayError> {
        let prompt = self.render_prompt(invocation.payload(), &invocation.workspace)?;

        let mut args = vec!["--model".to_string(), invocation.model.clone()];
        if let Some(key) = &invocation.api_key {
            args.extend(["--api-key".to_string(), key.clone()]);
        }
        if self.config.sandbox {
            args.extend(["--sandbox".to_string(), "enabled".to_string()]);
        }
        args.extend(
            ["--approve-mcps", "--force", "--print", "--resume"]
                .into_iter()
                .map(String::from),
        );
        args.push(invocation.session_id.clone());
        args.extend([
            "--workspace".to_string(),
            invocation.workspace.display().to_string(),
        ]);
        match self.config.output_format {
            OutputFormat::StreamJson => args.extend(
                ["--output-format", "stream-json", "--stream-partial-output"]
                    .into_iter()
                    .map(String::from),
            ),
            OutputFormat::Text => {
                args.extend(["--output-format".to_string(), "text".to_string()]);
            },
        }
        args.extend(self.config.extra_args.iter().cloned());
        args.push(prompt);

        debug!(
            mode = invocation.mode.as_str(),
            session_id = %invocation.session_id,
            messages = invocation.payload().len(),
            "built agent command"
        );
        Ok(args)
    }

    /// Merge messages into one prompt.
    ///
    /// Role labels are only added when the selection contains an assistant
    /// message; a lone user message is sent as-is. User content above the
    /// spill threshold is replaced by a file reference, attached images
    /// follow it one per line, and a leading `/name` is resolved against
    /// the slash commands visible from `workspace`.
    pub fn render_prompt(
        &self,
        messages: &[ChatMessage],
        workspace: &Path,
    ) -> Result<String, RelayError> {
        let labelled = messages.iter().any(|m| m.role == Role::Assistant);
        let slash = (self.config.slash_commands && messages.iter().any(|m| m.role == Role::User))
            .then(|| SlashCommands::load(workspace, self.home.as_deref()));
        let mut parts = Vec::with_capacity(messages.len());
        for msg in messages {
            let content = match msg.role {
                Role::User => {
                    let mut pieces = vec![self.spiller.process(&msg.content)?];
                    pieces.extend(msg.images.iter().map(|url| self.spiller.image_reference(url)));
                    let joined = pieces.join("\n");
                    match &slash {
                        Some(commands) => commands.resolve(joined.trim()),
                        None => joined,
                    }
                },
                Role::System | Role::Assistant => msg.content.clone(),
            };
            let content = content.trim();
            parts.push(if labelled {
                format!("{}: {content}", msg.role.label())
            } else {
                content.to_string()
            });
        }
        Ok(parts.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(config: AgentConfig) -> CommandBuilder {
        CommandBuilder::new(config, ContentSpiller::new(std::env::temp_dir(), 4000)).with_home(None)
    }

    fn invocation(mode: InvocationMode, messages: Vec<ChatMessage>) -> Invocation {
        Invocation {
            mode,
            model: "sonnet-4.5".into(),
            api_key: Some("key-1".into()),
            session_id: "sess-1".into(),
            workspace: PathBuf::from("/ws/sess-1"),
            messages,
        }
    }

    #[test]
    fn stream_json_turn_args() {
        let inv = invocation(InvocationMode::Resume, vec![ChatMessage::user("Hello!")]);
        let args = builder(AgentConfig::default()).turn_args(&inv).unwrap();
        assert_eq!(args, vec![
            "--model",
            "sonnet-4.5",
            "--api-key",
            "key-1",
            "--sandbox",
            "enabled",
            "--approve-mcps",
            "--force",
            "--print",
            "--resume",
            "sess-1",
            "--workspace",
            "/ws/sess-1",
            "--output-format",
            "stream-json",
            "--stream-partial-output",
            "Hello!",
        ]);
    }

    #[test]
    fn text_format_without_sandbox_or_key() {
        let config = AgentConfig {
            sandbox: false,
            output_format: OutputFormat::Text,
            extra_args: vec!["--verbose".into()],
            ..AgentConfig::default()
        };
        let mut inv = invocation(InvocationMode::New, vec![ChatMessage::user("x")]);
        inv.api_key = None;
        let args = builder(config).turn_args(&inv).unwrap();
        assert!(!args.iter().any(|a| a == "--api-key" || a == "--sandbox"));
        let tail: Vec<_> = args.iter().rev().take(4).rev().cloned().collect();
        assert_eq!(tail, vec!["--output-format", "text", "--verbose", "x"]);
    }

    #[test]
    fn resume_sends_only_newest_message() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("Hello!"),
            ChatMessage::assistant("Hi"),
            ChatMessage::user("How are you?"),
        ];
        let inv = invocation(InvocationMode::Resume, messages.clone());
        assert_eq!(inv.payload(), &messages[3..]);
        let args = builder(AgentConfig::default()).turn_args(&inv).unwrap();
        assert_eq!(args.last().unwrap(), "How are you?");
    }

    #[test]
    fn new_mode_labels_roles_when_assistant_present() {
        let messages = vec![
            ChatMessage::system(" be brief "),
            ChatMessage::user("Hello!"),
            ChatMessage::assistant("Hi"),
            ChatMessage::user("How are you?"),
        ];
        let prompt = builder(AgentConfig::default())
            .render_prompt(&messages, Path::new("/ws/sess-1"))
            .unwrap();
        assert_eq!(
            prompt,
            "SYSTEM: be brief\n\nUSER: Hello!\n\nASSISTANT: Hi\n\nUSER: How are you?"
        );
    }

    #[test]
    fn new_mode_without_assistant_is_unlabelled() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("Hello!")];
        let prompt = builder(AgentConfig::default())
            .render_prompt(&messages, Path::new("/ws/sess-1"))
            .unwrap();
        assert_eq!(prompt, "be brief\n\nHello!");
    }

    #[test]
    fn create_chat_args_shape() {
        let args = builder(AgentConfig::default())
            .create_chat_args(Path::new("/ws/temp_1"), Some("k"));
        assert_eq!(args, vec![
            "create-chat",
            "--workspace",
            "/ws/temp_1",
            "--sandbox",
            "enabled",
            "--api-key",
            "k",
        ]);
    }

    #[test]
    fn large_user_content_is_spilled_but_system_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let b = CommandBuilder::new(AgentConfig::default(), ContentSpiller::new(dir.path(), 5));
        let prompt = b
            .render_prompt(
                &[
                    ChatMessage::system("long system prompt"),
                    ChatMessage::user("long user content"),
                ],
                dir.path(),
            )
            .unwrap();
        let (system, user) = prompt.split_once("\n\n").unwrap();
        assert_eq!(system, "long system prompt");
        assert!(user.starts_with('@'));
    }

    #[test]
    fn slash_command_in_user_message_is_resolved() {
        let ws = tempfile::tempdir().unwrap();
        let def = ws.path().join(".claude/commands/review.md");
        std::fs::create_dir_all(def.parent().unwrap()).unwrap();
        std::fs::write(&def, "Review the change.").unwrap();
        let messages = vec![
            ChatMessage::system("/review is just text here"),
            ChatMessage::user("  /review src/main.rs  "),
        ];

        let prompt = builder(AgentConfig::default())
            .render_prompt(&messages, ws.path())
            .unwrap();
        assert_eq!(
            prompt,
            format!(
                "/review is just text here\n\nUse this command @{} src/main.rs",
                def.display()
            )
        );

        let disabled = AgentConfig {
            slash_commands: false,
            ..AgentConfig::default()
        };
        let prompt = builder(disabled)
            .render_prompt(&messages[1..], ws.path())
            .unwrap();
        assert_eq!(prompt, "/review src/main.rs");
    }

    #[test]
    fn user_images_follow_text() {
        let dir = tempfile::tempdir().unwrap();
        let b = CommandBuilder::new(AgentConfig::default(), ContentSpiller::new(dir.path(), 4000))
            .with_home(None);
        let messages = vec![
            ChatMessage::user("What is this?").with_images(vec![
                "https://example.com/cat.png".into(),
                "data:image/png;base64,aGVsbG8=".into(),
            ]),
        ];

        let prompt = b.render_prompt(&messages, dir.path()).unwrap();
        let lines: Vec<_> = prompt.lines().collect();
        assert_eq!(lines[0], "What is this?");
        assert_eq!(lines[1], "[Image URL: https://example.com/cat.png]");
        assert!(lines[2].starts_with(&format!("@{}", dir.path().display())));
        assert!(lines[2].ends_with(".png"));
    }
}
