//! Configuration loading for the CLI
//!
//! Layers, lowest first: built-in defaults, the TOML file, environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tether_core::TetherConfig;

/// Environment variable overriding the Consul address.
pub const ADDRESS_ENV: &str = "TETHER_CONSUL_ADDRESS";

/// Environment variable overriding the Consul ACL token.
pub const TOKEN_ENV: &str = "TETHER_CONSUL_TOKEN";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TETHER_CONFIG";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from `explicit`, else the default path if it
    /// exists, else defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<TetherConfig> {
        let config = match explicit {
            Some(path) => Self::load_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_file(&path)?
                } else {
                    TetherConfig::default()
                }
            }
        };

        Ok(Self::apply_overrides(config, |key| std::env::var(key).ok()))
    }

    /// Default config path, `./tether.toml` unless `TETHER_CONFIG` is set.
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("tether.toml"))
    }

    fn load_file(path: &Path) -> Result<TetherConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn apply_overrides(
        mut config: TetherConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> TetherConfig {
        if let Some(address) = lookup(ADDRESS_ENV).filter(|v| !v.is_empty()) {
            config.consul.address = address;
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.is_empty()) {
            config.consul.token = Some(token);
        }
        config
    }
}
