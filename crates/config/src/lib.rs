//! Configuration loading, validation, and env substitution.
//!
//! Config files: `relaygate.toml`, `relaygate.yaml`, or `relaygate.json`
//! Searched in `./` then `~/.config/relaygate/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in all
//! string values.

pub mod env;
pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    env::{apply_env_overrides, apply_process_env},
    loader::{
        clear_config_dir, config_dir, discover_and_load, find_config_file, load_config,
        set_config_dir,
    },
    schema::{
        AgentConfig, ModelsConfig, OutputFormat, RelayConfig, ServerConfig, SessionsConfig,
        UploadsConfig, WorkspaceConfig,
    },
};
