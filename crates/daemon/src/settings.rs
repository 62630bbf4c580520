//! Daemon settings
//!
//! Sources, lowest precedence first: built-in defaults, `gearflow.toml`
//! (`GEARFLOW_CONFIG`, else the platform config dir), `GEARFLOW__*` env vars.
//! `GEARFLOW__RPC__PORT=9600` overrides `rpc.port`.

use config::{Config, ConfigError, Environment, File};
use directories::ProjectDirs;
use gearflow_api_rpc::RpcServerConfig;
use gearflow_core::SchedulerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "GEARFLOW_CONFIG";
const ENV_PREFIX: &str = "GEARFLOW";
const DEFAULT_DB_PATH: &str = "~/.gearflow/gearflow.db";
const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseSettings {
    /// File path; `~` is expanded. `:memory:` for a throwaway database.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

impl DatabaseSettings {
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).into_owned())
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == IN_MEMORY
    }

    pub fn url(&self) -> String {
        if self.is_in_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}", self.expanded_path().display())
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RpcSettings {
    pub host: String,
    pub port: u16,
}

impl Default for RpcSettings {
    fn default() -> Self {
        let defaults = RpcServerConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
        }
    }
}

impl From<&RpcSettings> for RpcServerConfig {
    fn from(rpc: &RpcSettings) -> Self {
        RpcServerConfig {
            host: rpc.host.clone(),
            port: rpc.port,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweeperSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl SweeperSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Compute providers jobs may be routed to
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComputeSettings {
    pub providers: Vec<String>,
    /// Used when neither the caller nor the gear picks a provider
    pub default_provider: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    /// Write daily-rotated log files here in addition to stdout
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonSettings {
    pub database: DatabaseSettings,
    pub rpc: RpcSettings,
    pub sweeper: SweeperSettings,
    pub compute: ComputeSettings,
    pub scheduler: SchedulerConfig,
    pub log: LogSettings,
}

impl DaemonSettings {
    /// Load from `GEARFLOW_CONFIG` (must exist) or the optional default file
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(Some(Path::new(&path))),
            Err(_) => Self::load_from(None),
        }
    }

    pub fn load_from(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        match explicit {
            Some(path) => builder = builder.add_source(File::from(path).required(true)),
            None => {
                if let Some(path) = default_config_file() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("compute.providers"),
            )
            .build()?
            .try_deserialize()
    }
}

/// `<platform config dir>/gearflow.toml`
fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("io", "gearflow", "gearflow").map(|dirs| dirs.config_dir().join("gearflow.toml"))
}
