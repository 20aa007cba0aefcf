//! Configuration loading for deployments embedding the core.

use std::path::Path;

use wf_domain::config::Config;
use wf_domain::error::{Error, Result};

/// Parse a TOML config string. Missing sections and fields fall back to
/// their defaults.
pub fn load_config_str(raw: &str) -> Result<Config> {
    toml::from_str(raw).map_err(|e| Error::Validation(format!("config: {e}")))
}

/// Load a TOML config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)?;
    load_config_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_all_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.dev_server.ports.len(), 6);
        assert_eq!(config.context.max_tool_history, 50);
    }

    #[test]
    fn bad_toml_is_a_validation_error() {
        let err = load_config_str("[dev_server\nports = ???").unwrap_err();
        assert_eq!(err.kind(), wf_domain::ErrorKind::Validation);
    }

    #[test]
    fn sections_override() {
        let config = load_config_str(
            r#"
[dev_server]
ports = [4000, 4001]

[exec]
default_timeout_ms = 5000
"#,
        )
        .unwrap();
        assert_eq!(config.dev_server.ports, vec![4000, 4001]);
        assert_eq!(config.exec.default_timeout_ms, 5000);
        assert_eq!(config.exec.install_timeout_ms, 120_000);
    }
}
