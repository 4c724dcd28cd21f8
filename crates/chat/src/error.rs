use {
    relaygate_agent::RelayError,
    relaygate_sessions::{StoreError, WorkspaceError},
};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("messages must not be empty")]
    EmptyMessages,
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ChatError {
    /// Machine-readable kind for error bodies and stream error frames.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyMessages => "invalid_request_error",
            Self::Relay(e) => e.kind(),
            Self::Store(_) | Self::Workspace(_) | Self::Join(_) => "store_error",
        }
    }
}
