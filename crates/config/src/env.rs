//! Environment overrides applied on top of the loaded file.

use std::path::PathBuf;

use tracing::warn;

use crate::schema::RelayConfig;

/// Number of `WORKSPACE_WHITELIST_<n>` slots read from the environment.
pub const WHITELIST_ENV_SLOTS: usize = 5;

/// Apply overrides from the process environment.
pub fn apply_process_env(config: &mut RelayConfig) {
    apply_env_overrides(config, |name| std::env::var(name).ok());
}

/// Apply `CURSOR_KEY`, `HOST`, `PORT`, `CURSOR_AGENT_BIN` and
/// `WORKSPACE_WHITELIST_1..5` from `lookup`. Empty values are ignored.
pub fn apply_env_overrides(config: &mut RelayConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(key) = get("CURSOR_KEY") {
        config.server.api_key = Some(key);
    }
    if let Some(host) = get("HOST") {
        config.server.bind = host;
    }
    if let Some(port) = get("PORT") {
        match port.parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid PORT"),
        }
    }
    if let Some(bin) = get("CURSOR_AGENT_BIN") {
        config.agent.binary = bin;
    }

    for slot in 1..=WHITELIST_ENV_SLOTS {
        let Some(entry) = get(&format!("WORKSPACE_WHITELIST_{slot}")) else {
            continue;
        };
        let path = PathBuf::from(entry);
        if !path.is_absolute() {
            warn!(path = %path.display(), slot, "ignoring relative whitelist entry");
            continue;
        }
        if !config.workspace.whitelist.contains(&path) {
            config.workspace.whitelist.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn overrides_server_and_agent() {
        let mut cfg = RelayConfig::default();
        apply_env_overrides(
            &mut cfg,
            lookup_from(&[
                ("CURSOR_KEY", "sk-test"),
                ("HOST", "127.0.0.1"),
                ("PORT", "9100"),
                ("CURSOR_AGENT_BIN", "/opt/agent/bin/cursor-agent"),
            ]),
        );
        assert_eq!(cfg.server.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.agent.binary, "/opt/agent/bin/cursor-agent");
    }

    #[test]
    fn invalid_port_and_empty_values_ignored() {
        let mut cfg = RelayConfig::default();
        apply_env_overrides(&mut cfg, lookup_from(&[("PORT", "http"), ("CURSOR_KEY", "  ")]));
        assert_eq!(cfg.server.port, 8000);
        assert!(cfg.server.api_key.is_none());
    }

    #[test]
    fn whitelist_slots_append_absolute_paths() {
        let mut cfg = RelayConfig::default();
        cfg.workspace.whitelist.push(PathBuf::from("/srv/a"));
        apply_env_overrides(
            &mut cfg,
            lookup_from(&[
                ("WORKSPACE_WHITELIST_1", "/srv/a"),
                ("WORKSPACE_WHITELIST_2", "relative/dir"),
                ("WORKSPACE_WHITELIST_5", "/home/dev/projects"),
                ("WORKSPACE_WHITELIST_6", "/ignored"),
            ]),
        );
        assert_eq!(cfg.workspace.whitelist, vec![
            PathBuf::from("/srv/a"),
            PathBuf::from("/home/dev/projects"),
        ]);
    }
}
