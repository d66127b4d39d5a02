//! Final configuration layer: command-line flags over files and environment.

use std::path::Path;

use anyhow::{Context, Result};
use guestlink_core::BoundaryMode;
use guestlink_core::config::{Config, load_config, load_config_from};

/// Flags that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub log_level: Option<String>,
    pub timeout_ms: Option<u64>,
    pub framing: Option<BoundaryMode>,
}

/// Resolve configuration for this invocation.
///
/// An explicit `config_path` replaces the global/project file lookup;
/// environment overrides apply either way.
pub fn resolve(config_path: Option<&Path>, overrides: &CliOverrides) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => load_config_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let cwd = std::env::current_dir().ok();
            load_config(cwd.as_deref()).context("Failed to load configuration")?
        }
    };
    apply(&mut config, overrides);
    Ok(config)
}

pub fn apply(config: &mut Config, overrides: &CliOverrides) {
    if let Some(level) = &overrides.log_level {
        config.log_level.clone_from(level);
    }
    if let Some(ms) = overrides.timeout_ms {
        config.dispatch.timeout_ms = Some(ms);
    }
    if let Some(boundary) = overrides.framing {
        config.framing.boundary = boundary;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use guestlink_core::Endpoint;

    use super::*;

    #[test]
    fn explicit_file_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guestlink.json");
        std::fs::write(
            &path,
            r#"{
                "workers": {"vm-1": {"tcp": "10.0.0.5:7000"}},
                "dispatch": {"timeout_ms": 5000},
                "log_level": "warn"
            }"#,
        )
        .unwrap();

        let overrides = CliOverrides {
            log_level: Some("debug".into()),
            timeout_ms: None,
            framing: Some(BoundaryMode::Complete),
        };
        let config = resolve(Some(path.as_path()), &overrides).unwrap();

        assert_eq!(config.workers["vm-1"], Endpoint::Tcp("10.0.0.5:7000".into()));
        assert_eq!(config.dispatch.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.framing.boundary, BoundaryMode::Complete);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(Some(dir.path().join("absent.json").as_path()), &CliOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn timeout_flag_overrides_file() {
        let mut config = Config::default();
        config.dispatch.timeout_ms = Some(100);
        apply(
            &mut config,
            &CliOverrides {
                timeout_ms: Some(250),
                ..CliOverrides::default()
            },
        );
        assert_eq!(config.dispatch.timeout_ms, Some(250));
        assert_eq!(config.log_level, "info");
    }
}
