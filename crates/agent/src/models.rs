//! Model list snapshot: defaults, on-disk cache, and `<binary> models` parsing.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, OnceLock},
    time::Duration,
};

use {
    regex::Regex,
    serde::{Deserialize, Serialize},
    tokio::{process::Command, sync::RwLock},
    tracing::{debug, info, warn},
};

use crate::error::RelayError;

const CLAUDE_PREFIX: &str = "claude-";
const CLAUDE_FAMILIES: &[&str] = &["opus-", "sonnet-"];

/// One model as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Agent-side id (`sonnet-4.5`, not `claude-sonnet-4.5`).
    pub id: String,
    pub owned_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ModelEntry {
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owned_by: owned_by.into(),
            name: None,
        }
    }
}

/// Id shown to API callers: Claude families gain a `claude-` prefix.
pub fn to_display_id(id: &str) -> String {
    if !id.starts_with(CLAUDE_PREFIX) && CLAUDE_FAMILIES.iter().any(|p| id.starts_with(p)) {
        format!("{CLAUDE_PREFIX}{id}")
    } else {
        id.to_string()
    }
}

/// Id passed to the agent: strips the display prefix.
pub fn to_cli_id(id: &str) -> &str {
    id.strip_prefix(CLAUDE_PREFIX).unwrap_or(id)
}

/// Built-in list used when neither cache nor agent output is available.
pub fn default_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new("auto", "cursor"),
        ModelEntry::new("composer-1", "cursor"),
        ModelEntry::new("gpt-5.1", "openai"),
        ModelEntry::new("sonnet-4.5", "anthropic"),
    ]
}

#[allow(clippy::expect_used)]
fn model_line() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"^([a-zA-Z0-9._-]+)\s+-\s+(.+)$").expect("model line regex must compile")
    })
}

#[allow(clippy::expect_used)]
fn status_tag() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"\s+\([^)]*?\b(?:default|current)\b[^)]*?\)$").expect("status tag regex must compile")
    })
}

#[allow(clippy::expect_used)]
fn ansi_escape() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("ansi regex must compile")
    })
}

/// Parse the table printed by `<binary> models`.
///
/// Lines before the `Available models` header are skipped, as are tips and
/// progress lines. Trailing status tags such as `(current, default)` are
/// removed from the name. Returns an empty list if nothing matched.
pub fn parse_models_output(output: &str) -> Vec<ModelEntry> {
    let cleaned = ansi_escape().replace_all(output, "");
    let mut parsing = false;
    let mut models = Vec::new();
    for raw in cleaned.lines() {
        let line = raw.trim();
        if line.contains("Available models") {
            parsing = true;
            continue;
        }
        if !parsing || line.is_empty() || line.starts_with("Tip:") || line.starts_with("Loading") {
            continue;
        }
        let Some(caps) = model_line().captures(line) else {
            debug!(line, "skipping unparseable model line");
            continue;
        };
        let name = status_tag().replace(caps[2].trim(), "").trim().to_string();
        models.push(ModelEntry {
            id: caps[1].to_string(),
            owned_by: "cursor".to_string(),
            name: Some(name),
        });
    }
    models
}

/// Shared model snapshot. Read by the gateway, refreshed by the CLI.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    cache_path: PathBuf,
    models: Arc<RwLock<Vec<ModelEntry>>>,
}

impl ModelRegistry {
    pub fn new(cache_path: impl Into<PathBuf>, models: Vec<ModelEntry>) -> Self {
        Self {
            cache_path: cache_path.into(),
            models: Arc::new(RwLock::new(models)),
        }
    }

    /// Load the cache file, falling back to the built-in list.
    pub fn load(cache_path: impl Into<PathBuf>) -> Self {
        let cache_path = cache_path.into();
        let models = match read_cache(&cache_path) {
            Ok(Some(models)) if !models.is_empty() => {
                debug!(count = models.len(), path = %cache_path.display(), "loaded model cache");
                models
            },
            Ok(_) => {
                info!(path = %cache_path.display(), "no model cache, using defaults");
                default_models()
            },
            Err(e) => {
                warn!(path = %cache_path.display(), error = %e, "unreadable model cache, using defaults");
                default_models()
            },
        };
        Self::new(cache_path, models)
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Current snapshot in agent naming.
    pub async fn snapshot(&self) -> Vec<ModelEntry> {
        self.models.read().await.clone()
    }

    /// Whether `id` (display or agent naming) is in the snapshot.
    pub async fn contains(&self, id: &str) -> bool {
        let cli_id = to_cli_id(id);
        self.models
            .read()
            .await
            .iter()
            .any(|m| m.id == id || m.id == cli_id)
    }

    /// Run `<binary> models`, replace the snapshot, and write the cache.
    ///
    /// A spawn failure or unparseable output yields the built-in list.
    pub async fn refresh(
        &self,
        binary: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<ModelEntry>, RelayError> {
        let models = match fetch_models(binary, api_key, timeout).await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => {
                warn!("could not parse any models from agent output, using defaults");
                default_models()
            },
            Err(e) => {
                warn!(error = %e, "failed to list models, using defaults");
                default_models()
            },
        };
        write_cache(&self.cache_path, &models)?;
        *self.models.write().await = models.clone();
        info!(count = models.len(), path = %self.cache_path.display(), "model list updated");
        Ok(models)
    }
}

async fn fetch_models(
    binary: &str,
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<Vec<ModelEntry>, RelayError> {
    let mut cmd = Command::new(binary);
    cmd.arg("models");
    if let Some(key) = api_key {
        cmd.args(["--api-key", key]);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| RelayError::Spawn {
        binary: binary.to_string(),
        source,
    })?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| RelayError::Timeout {
            secs: timeout.as_secs(),
        })?
        .map_err(RelayError::Stream)?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!(exit_code = output.status.code(), bytes = stdout.len(), "models command done");
    Ok(parse_models_output(&stdout))
}

fn read_cache(path: &Path) -> Result<Option<Vec<ModelEntry>>, RelayError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RelayError::io(path)(e)),
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| RelayError::io(path)(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

fn write_cache(path: &Path, models: &[ModelEntry]) -> Result<(), RelayError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(RelayError::io(parent))?;
    }
    let data = serde_json::to_string_pretty(models)
        .map_err(|e| RelayError::io(path)(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    std::fs::write(path, data).map_err(RelayError::io(path))
}
