use std::{io, path::PathBuf};

/// Failures of one agent invocation.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The binary could not be started (missing, not executable).
    #[error("failed to spawn agent binary {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },
    /// The agent exited unsuccessfully.
    #[error("agent exited with {}: {stderr}", exit_label(*code))]
    Execution { code: Option<i32>, stderr: String },
    #[error("agent timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("agent printed no session id")]
    MissingSessionId,
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The output stream broke before the agent finished.
    #[error("agent output stream failed: {0}")]
    Stream(#[source] io::Error),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "signal".to_string(),
    }
}

impl RelayError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    /// Short machine-readable kind, used in error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn_error",
            Self::Execution { .. } | Self::MissingSessionId | Self::Stream(_) => "cli_error",
            Self::Timeout { .. } => "timeout",
            Self::Io { .. } => "io_error",
        }
    }
}

/// Maximum characters of stderr carried into an error message.
pub const STDERR_SUMMARY_CHARS: usize = 2000;

/// Trim captured stderr to something fit for an error body.
pub fn summarize_stderr(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(STDERR_SUMMARY_CHARS) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
