//! TOML server configuration for toolbridge.
//!
//! The file is located with this precedence:
//! explicit path > `TOOLBRIDGE_CONFIG` > `<config dir>/servers.toml`
//!
//! Entries that fail validation are dropped with a warning and reported in
//! [`LoadedConfig::rejected`]; they never reach the manager.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use toolbridge_mcp::{ClientInfo, RawServerDescriptor, ServerDescriptor};

/// File name of the server list inside the config directory.
pub const CONFIG_FILE_NAME: &str = "servers.toml";

/// Environment variable naming the config file directly.
pub const CONFIG_FILE_ENV: &str = "TOOLBRIDGE_CONFIG";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "TOOLBRIDGE_CONFIG_DIR";

/// Errors from reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// The configuration file as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub servers: Vec<RawServerDescriptor>,
}

/// The `[client]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Name advertised to servers in `clientInfo`.
    pub name: Option<String>,
}

/// A server entry that was dropped during loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedServer {
    pub name: String,
    pub reason: String,
}

/// Configuration after validation.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Where the configuration was looked for.
    pub path: PathBuf,
    pub client_name: Option<String>,
    /// Valid servers, in file order. Disabled entries are kept.
    pub servers: Vec<ServerDescriptor>,
    pub rejected: Vec<RejectedServer>,
}

impl LoadedConfig {
    /// Client identity for the MCP handshake.
    pub fn client_info(&self) -> ClientInfo {
        let default = ClientInfo::default();
        match &self.client_name {
            Some(name) => ClientInfo::new(name.clone(), default.version),
            None => default,
        }
    }
}

/// Get the toolbridge config directory path (~/.toolbridge/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolbridge")
}

/// Decide which file to read.
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    let from_env = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
    pick_path(explicit, from_env, config_dir())
}

fn pick_path(explicit: Option<&Path>, from_env: Option<PathBuf>, dir: PathBuf) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match from_env {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => dir.join(CONFIG_FILE_NAME),
    }
}

/// Resolve the config path and load it.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    load_from(&resolve_path(explicit))
}

/// Load a config file. A missing file yields an empty server list.
pub fn load_from(path: &Path) -> Result<LoadedConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse(&content, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}", path.display());
            Ok(LoadedConfig {
                path: path.to_path_buf(),
                ..LoadedConfig::default()
            })
        }
        Err(e) => Err(ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Parse and validate configuration text. `path` is only used in messages.
pub fn parse(content: &str, path: &Path) -> Result<LoadedConfig, ConfigError> {
    let file: ConfigFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut servers = Vec::with_capacity(file.servers.len());
    let mut rejected = Vec::new();
    for (index, raw) in file.servers.into_iter().enumerate() {
        let name = if raw.name.is_empty() {
            format!("#{}", index + 1)
        } else {
            raw.name.clone()
        };
        match ServerDescriptor::try_from(raw) {
            Ok(descriptor) => servers.push(descriptor),
            Err(e) => {
                tracing::warn!("Ignoring server entry {name} in {}: {e}", path.display());
                rejected.push(RejectedServer {
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(LoadedConfig {
        path: path.to_path_buf(),
        client_name: file.client.name.filter(|n| !n.trim().is_empty()),
        servers,
        rejected,
    })
}
