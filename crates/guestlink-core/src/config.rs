//! Configuration resolution for guestlink.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/guestlink/settings.json)
//! 3. Project config (.guestlink/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::BoundaryMode;
use crate::error::{Error, Result};
use crate::registry::ReconnectPolicy;

/// Complete guestlink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Guest endpoints keyed by worker id.
    #[serde(default)]
    pub workers: BTreeMap<String, Endpoint>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: BTreeMap::new(),
            reconnect: ReconnectConfig::default(),
            dispatch: DispatchConfig::default(),
            framing: FramingConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where a worker's guest endpoint listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// `host:port`
    Tcp(String),
    /// Path to a Unix domain socket.
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Reconnection settings for worker channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Reconnect attempts before a worker is marked failed (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Discard queued frames and any partial frame when a channel is replaced.
    pub reset_on_reconnect: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: Some(10),
            reset_on_reconnect: false,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
            reset_on_reconnect: config.reset_on_reconnect,
        }
    }
}

/// Dispatch gate settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound for one submission, drain wait included (None = wait forever).
    pub timeout_ms: Option<u64>,
}

impl DispatchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Frame codec settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    pub boundary: BoundaryMode,
}

/// Load configuration with hierarchical resolution.
///
/// Each file only overrides the keys it sets; keys it leaves out keep the
/// value from the layer below.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();

    // Load global config
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        layers.push(load_config_file(&global_path)?);
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = dir.join(".guestlink").join("settings.json");
        if project_path.exists() {
            layers.push(load_config_file(&project_path)?);
        }
    }

    let mut config = resolve_layers(layers)?;
    apply_overrides(&mut config, |key| std::env::var(key).ok())?;

    Ok(config)
}

/// Load configuration from one explicit file, then apply environment overrides.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let mut config = resolve_layers([load_config_file(path)?])?;
    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("guestlink").join("settings.json"))
}

type Layer = Map<String, Value>;

fn load_config_file(path: &Path) -> Result<Layer> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(layer) => Ok(layer),
        _ => Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        ))),
    }
}

/// Merge layers in order over the built-in defaults.
fn resolve_layers(layers: impl IntoIterator<Item = Layer>) -> Result<Config> {
    let mut merged = Layer::new();
    for layer in layers {
        merge_config(&mut merged, layer);
    }
    Ok(serde_json::from_value(Value::Object(merged))?)
}

fn merge_config(base: &mut Layer, overlay: Layer) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            // Workers from later files add to or replace earlier entries
            (Some(Value::Object(existing)), Value::Object(incoming)) if key == "workers" => {
                existing.extend(incoming);
            }
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_config(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply `GUESTLINK_*` overrides read through `lookup`.
pub fn apply_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(val) = lookup("GUESTLINK_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(val) = lookup("GUESTLINK_DISPATCH_TIMEOUT_MS") {
        let ms = val.parse().map_err(|e| {
            Error::Config(format!("Invalid GUESTLINK_DISPATCH_TIMEOUT_MS '{val}': {e}"))
        })?;
        config.dispatch.timeout_ms = Some(ms);
    }
    if let Some(val) = lookup("GUESTLINK_FRAMING") {
        config.framing.boundary = val.parse()?;
    }
    if let Some(val) = lookup("GUESTLINK_MAX_RECONNECTS") {
        let attempts = val.parse().map_err(|e| {
            Error::Config(format!("Invalid GUESTLINK_MAX_RECONNECTS '{val}': {e}"))
        })?;
        config.reconnect.max_attempts = Some(attempts);
    }
    Ok(())
}
