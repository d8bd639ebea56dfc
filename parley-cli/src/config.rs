//! Configuration file resolution.

use std::path::Path;

use anyhow::{Context, Result};
use parley_client::ConversationConfig;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "parley.toml";

/// Load and validate the config file. A missing file means all defaults.
pub fn load(path: &Path) -> Result<ConversationConfig> {
    if !path.exists() {
        tracing::debug!("{} not found, using defaults", path.display());
        return Ok(ConversationConfig::default());
    }
    ConversationConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))
}
