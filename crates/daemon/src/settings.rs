//! Engine configuration loading
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. the TOML file named by `QUARRY_CONFIG` (default `quarry.toml`, optional)
//! 3. `QUARRY_*` environment variables, `__` between nested keys
//!    (`QUARRY_DATABASE_URL`, `QUARRY_RPC__PORT`, `QUARRY_DISPATCHER__BATCH_SIZE`)

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use quarry_core::config::EngineConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_CONFIG_FILE: &str = "quarry.toml";
const ENV_PREFIX: &str = "QUARRY";

/// Load and validate the engine configuration
pub fn load() -> Result<EngineConfig> {
    let path = std::env::var("QUARRY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<EngineConfig> {
    let mut builder = Config::builder();

    if path.exists() {
        debug!(path = %path.display(), "Loading config file");
        builder = builder.add_source(File::from(path.to_path_buf()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let engine_config: EngineConfig = builder
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Invalid configuration")?;

    engine_config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    Ok(engine_config)
}
