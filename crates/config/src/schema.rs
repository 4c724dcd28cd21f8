//! Config schema types (server, agent, sessions, workspace, uploads, models).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub sessions: SessionsConfig,
    pub workspace: WorkspaceConfig,
    pub uploads: UploadsConfig,
    pub models: ModelsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Key forwarded to the agent when a request carries no `Authorization` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8000,
            api_key: None,
        }
    }
}

/// How the agent's stdout is framed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Newline-delimited JSON events (`--output-format stream-json`).
    #[default]
    StreamJson,
    /// Plain incremental text (`--output-format text`).
    Text,
}

/// External agent process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable, either a bare command name or a path.
    pub binary: String,
    /// Maximum duration of one turn.
    pub turn_timeout_secs: u64,
    /// Maximum duration of `create-chat`.
    pub create_timeout_secs: u64,
    /// Pass `--sandbox enabled`.
    pub sandbox: bool,
    pub output_format: OutputFormat,
    /// Extra arguments inserted before the prompt.
    pub extra_args: Vec<String>,
    /// Cap on captured stderr kept for diagnostics.
    pub max_stderr_bytes: usize,
    /// Rewrite `/name` user messages that match a command, skill, or agent
    /// definition under `.claude/` or `.cursor/`.
    pub slash_commands: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "cursor-agent".into(),
            turn_timeout_secs: 300,
            create_timeout_secs: 30,
            sandbox: true,
            output_format: OutputFormat::default(),
            extra_args: Vec::new(),
            max_stderr_bytes: 64 * 1024,
            slash_commands: true,
        }
    }
}

impl AgentConfig {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }
}

/// Session map and workspace locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Fingerprint → session map. The lock artifact lives next to it.
    pub storage_path: PathBuf,
    /// Root of everything the relay owns on disk; removed by `clear`.
    pub relay_base: PathBuf,
    /// Parent of the per-session workspace directories.
    pub workspace_base: PathBuf,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        let relay_base = PathBuf::from(".cursor-relay");
        Self {
            storage_path: PathBuf::from("sessions.json"),
            workspace_base: relay_base.join("workspaces"),
            relay_base,
        }
    }
}

impl SessionsConfig {
    /// `<storage_path>.lock`
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.storage_path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }
}

/// Caller-selectable workspace overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Absolute directories a `<workspace>` tag may point into.
    pub whitelist: Vec<PathBuf>,
}

/// Oversized user content is moved into files under `dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    pub threshold_chars: usize,
    pub dir: PathBuf,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            threshold_chars: 4000,
            dir: std::env::temp_dir().join("cursor-cli-proxy"),
        }
    }
}

/// Model list snapshot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub cache_path: PathBuf,
    /// Reject requests for models missing from the snapshot.
    pub strict: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("models.json"),
            strict: false,
        }
    }
}
