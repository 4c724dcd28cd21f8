use {
    anyhow::Result,
    clap::Subcommand,
    relaygate_agent::{ModelRegistry, to_display_id},
    relaygate_config::RelayConfig,
};

#[derive(Subcommand)]
pub enum ModelAction {
    /// Show the cached model list served by `/v1/models`.
    List,
    /// Run `<agent> models` and rewrite the cache.
    Update,
}

pub async fn handle_models(action: ModelAction, config: &RelayConfig) -> Result<()> {
    let registry = ModelRegistry::load(config.models.cache_path.clone());
    match action {
        ModelAction::List => list(&registry).await,
        ModelAction::Update => update(&registry, config).await,
    }
}

async fn list(registry: &ModelRegistry) -> Result<()> {
    let models = registry.snapshot().await;
    println!("{:<32} {:<12} NAME", "ID", "OWNER");
    for model in &models {
        println!(
            "{:<32} {:<12} {}",
            to_display_id(&model.id),
            model.owned_by,
            model.name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn update(registry: &ModelRegistry, config: &RelayConfig) -> Result<()> {
    println!("Updating model list from {}...", config.agent.binary);
    let models = registry
        .refresh(
            &config.agent.binary,
            config.server.api_key.as_deref(),
            config.agent.create_timeout(),
        )
        .await?;
    println!(
        "Wrote {} model{} to {}.",
        models.len(),
        if models.len() == 1 {
            ""
        } else {
            "s"
        },
        registry.cache_path().display()
    );
    Ok(())
}
