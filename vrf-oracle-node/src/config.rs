use anyhow::{Context, Result};
use serde::Deserialize;
use vrf_oracle_broadcaster::config::BroadcasterConfig;
use vrf_oracle_logger::LogConfig;

/// The prefix of environment variables that override file settings, e.g.
/// `VRF_ORACLE__BACKFILL__DEPTH=50`.
pub const ENV_PREFIX: &str = "VRF_ORACLE";

/// The top-level configuration of an oracle node.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    #[serde(default)]
    pub broadcaster: BroadcasterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

/// Where consumed-log markers are persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "./vrf_oracle.db".to_string(),
        }
    }
}

/// Loads the node configuration from a TOML file, overlaid by `VRF_ORACLE__*`
/// environment variables. Sections missing from both fall back to defaults.
pub fn load_config(path: &str) -> Result<NodeConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let settings: NodeConfig = builder
        .build()
        .context(format!("Failed to build configuration from '{}'", path))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
