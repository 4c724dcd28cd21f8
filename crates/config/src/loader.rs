use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    anyhow::Context,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "relaygate.toml",
    "relaygate.yaml",
    "relaygate.yml",
    "relaygate.json",
];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, config discovery only looks in
/// this directory (project-local and user-global paths are skipped).
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./relaygate.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/relaygate/relaygate.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RelayConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load() -> RelayConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return RelayConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load config, using defaults");
            RelayConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return find_in(&dir);
    }

    find_in(Path::new(".")).or_else(|| user_config_dir().and_then(|dir| find_in(&dir)))
}

/// Returns the config directory: override, or `~/.config/relaygate/`.
pub fn config_dir() -> Option<PathBuf> {
    config_dir_override().or_else(user_config_dir)
}

fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("relaygate"))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::schema::OutputFormat};

    #[test]
    fn loads_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("relaygate.toml");
        std::fs::write(&toml_path, "[server]\nport = 9001\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().server.port, 9001);

        let yaml_path = dir.path().join("relaygate.yaml");
        std::fs::write(&yaml_path, "agent:\n  output_format: text\n").unwrap();
        assert_eq!(
            load_config(&yaml_path).unwrap().agent.output_format,
            OutputFormat::Text
        );

        let json_path = dir.path().join("relaygate.json");
        std::fs::write(&json_path, r#"{"models":{"strict":true}}"#).unwrap();
        assert!(load_config(&json_path).unwrap().models.strict);
    }

    #[test]
    fn unsupported_extension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaygate.ini");
        std::fs::write(&path, "port=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("unsupported config format"));
    }

    #[test]
    fn find_in_respects_filename_order() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_in(dir.path()).is_none());

        std::fs::write(dir.path().join("relaygate.json"), "{}").unwrap();
        std::fs::write(dir.path().join("relaygate.toml"), "").unwrap();
        assert_eq!(
            find_in(dir.path()).unwrap(),
            dir.path().join("relaygate.toml")
        );
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/relaygate.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/relaygate.toml"));
    }
}
