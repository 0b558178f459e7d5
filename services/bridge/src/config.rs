//! Daemon configuration.
//!
//! Loaded from a TOML file at startup; every section and field has a
//! default so a missing file or a partial file still yields a runnable
//! daemon.
//!
//! ```toml
//! [listen]
//! address = "0.0.0.0"
//! port = 65535
//!
//! [modules]
//! worker_limit = 8
//!
//! [log]
//! level = "info"
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main bridge configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Where the daemon waits for its single control connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging settings; the CLI flag takes precedence when given
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Module runtime settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModulesConfig {
    /// Concurrent background workers allowed per module
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    65535
}

fn default_worker_limit() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            worker_limit: default_worker_limit(),
        }
    }
}

impl BridgeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen.address, self.listen.port)
    }
}
