use std::sync::Arc;

use anyhow::Result;
use tether_core::{ConsulBackend, CoordinationBackend, TetherConfig};

pub mod lock;
pub mod sessions;

/// Build the Consul backend described by the configuration.
pub fn connect(config: &TetherConfig) -> Result<Arc<dyn CoordinationBackend>> {
    Ok(Arc::new(ConsulBackend::new(config.consul.clone())?))
}

/// Print the effective configuration as TOML.
pub fn show_config(config: &TetherConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{}", toml_str);
    Ok(())
}
