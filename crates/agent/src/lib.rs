//! Process relay for the external agent binary: argv construction, content
//! spill, slash commands, child lifetime, stdout decoding, and the model list.

pub mod command;
pub mod decode;
pub mod error;
pub mod format;
pub mod models;
pub mod process;
pub mod slash;
pub mod upload;

pub use {
    command::{CommandBuilder, Invocation, InvocationMode},
    error::RelayError,
    models::{ModelEntry, ModelRegistry, to_cli_id, to_display_id},
    process::{AgentBackend, AgentRelay, TurnEvent, TurnHandle},
    slash::SlashCommands,
    upload::ContentSpiller,
};

use relaygate_config::RelayConfig;

/// Relay wired from the loaded configuration.
pub fn relay_from_config(config: &RelayConfig) -> AgentRelay {
    AgentRelay::new(CommandBuilder::new(
        config.agent.clone(),
        ContentSpiller::from_config(&config.uploads),
    ))
}
