use std::{sync::Arc, time::Instant};

use {
    anyhow::Context,
    relaygate_agent::{AgentBackend, ModelRegistry, relay_from_config},
    relaygate_chat::ChatEngine,
    relaygate_config::RelayConfig,
    tracing::warn,
};

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across handlers.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    /// Loaded configuration. Never mutated after startup.
    pub config: Arc<RelayConfig>,
    pub engine: ChatEngine,
    /// Snapshot served by `/v1/models`.
    pub models: ModelRegistry,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(config: Arc<RelayConfig>, engine: ChatEngine, models: ModelRegistry) -> Arc<Self> {
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            engine,
            models,
            started_at: Instant::now(),
        })
    }

    /// Wire the engine and model registry against the real agent binary.
    pub fn from_config(config: Arc<RelayConfig>) -> anyhow::Result<Arc<Self>> {
        let backend: Arc<dyn AgentBackend> = Arc::new(relay_from_config(&config));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(
        config: Arc<RelayConfig>,
        backend: Arc<dyn AgentBackend>,
    ) -> anyhow::Result<Arc<Self>> {
        let engine = ChatEngine::from_config(&config, backend).with_context(|| {
            format!(
                "failed to open session store {}",
                config.sessions.storage_path.display()
            )
        })?;
        let models = ModelRegistry::load(config.models.cache_path.clone());
        Ok(Self::new(config, engine, models))
    }

    /// Number of stored sessions, or `None` if the store is unreadable.
    pub async fn session_count(&self) -> Option<usize> {
        let store = self.engine.store().clone();
        match tokio::task::spawn_blocking(move || store.len()).await {
            Ok(Ok(count)) => Some(count),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to count sessions");
                None
            },
            Err(e) => {
                warn!(error = %e, "session count task failed");
                None
            },
        }
    }
}
