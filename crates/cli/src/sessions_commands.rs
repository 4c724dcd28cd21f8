use {
    anyhow::{Context, Result},
    clap::Subcommand,
    relaygate_common::time::now_ms,
    relaygate_config::RelayConfig,
    relaygate_sessions::{SessionStore, remove_tree},
    tracing::info,
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// List stored sessions, most recently used first.
    List,
}

pub fn handle_sessions(action: SessionAction, config: &RelayConfig) -> Result<()> {
    match action {
        SessionAction::List => list(config),
    }
}

fn open_store(config: &RelayConfig) -> Result<SessionStore> {
    SessionStore::open(
        config.sessions.storage_path.clone(),
        config.sessions.lock_path(),
    )
    .with_context(|| {
        format!(
            "failed to open session store {}",
            config.sessions.storage_path.display()
        )
    })
}

fn list(config: &RelayConfig) -> Result<()> {
    let records = open_store(config)?.list()?;
    if records.is_empty() {
        println!("No sessions stored.");
        return Ok(());
    }
    println!("{:<38} {:>5} {:>10}  TITLE", "SESSION", "TURNS", "UPDATED");
    let now = now_ms();
    for record in &records {
        println!(
            "{:<38} {:>5} {:>10}  {}",
            record.session_id,
            record.turns,
            format_age(now.saturating_sub(record.updated_at)),
            record.title.replace('\n', " ")
        );
        println!("{:<38} {}", "", record.workspace_dir.display());
    }
    Ok(())
}

/// Empty the map, drop the lock artifact, and delete the relay-owned trees.
pub fn clear(config: &RelayConfig) -> Result<()> {
    let removed = open_store(config)?.clear_all()?;
    println!(
        "Removed {removed} session{} from {}.",
        if removed == 1 {
            ""
        } else {
            "s"
        },
        config.sessions.storage_path.display()
    );

    let mut trees = vec![config.sessions.relay_base.clone()];
    if !config
        .sessions
        .workspace_base
        .starts_with(&config.sessions.relay_base)
    {
        trees.push(config.sessions.workspace_base.clone());
    }
    for tree in &trees {
        if remove_tree(tree)? {
            println!("Deleted {}.", tree.display());
        } else {
            println!("{} does not exist, skipping.", tree.display());
        }
    }
    info!(sessions = removed, "relay state cleared");
    Ok(())
}

fn format_age(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0..60 => format!("{secs}s ago"),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86_400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
