mod models_commands;
mod sessions_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    relaygate_config::RelayConfig,
    tracing::{debug, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "relaygate", about = "relaygate: OpenAI-compatible gateway for a CLI coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory holding relaygate.{toml,yaml,json}.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Overrides `server.bind` and `HOST`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port` and `PORT`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Empty the session map and delete everything under the relay base.
    Clear,
    /// Session management.
    Sessions {
        #[command(subcommand)]
        action: sessions_commands::SessionAction,
    },
    /// Model list management.
    Models {
        #[command(subcommand)]
        action: models_commands::ModelAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Config file, then environment overrides.
fn load_config(cli: &Cli) -> RelayConfig {
    if let Some(dir) = &cli.config_dir {
        relaygate_config::set_config_dir(dir.clone());
    }
    let mut config = relaygate_config::discover_and_load();
    relaygate_config::apply_process_env(&mut config);
    config
}

/// Replace a bare agent command name with its absolute path.
fn resolve_agent_binary(config: &mut RelayConfig) {
    match which::which(&config.agent.binary) {
        Ok(path) => {
            debug!(binary = %config.agent.binary, path = %path.display(), "resolved agent binary");
            config.agent.binary = path.display().to_string();
        },
        Err(e) => {
            warn!(binary = %config.agent.binary, error = %e, "agent binary not found, turns will fail");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "relaygate starting");
    let mut config = load_config(&cli);

    match cli.command {
        Commands::Gateway { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            resolve_agent_binary(&mut config);
            relaygate_gateway::start_gateway(config).await
        },
        Commands::Clear => sessions_commands::clear(&config),
        Commands::Sessions { action } => sessions_commands::handle_sessions(action, &config),
        Commands::Models { action } => {
            resolve_agent_binary(&mut config);
            models_commands::handle_models(action, &config).await
        },
    }
}
