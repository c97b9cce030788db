//! Per-directory configuration (.driftsync.toml)

use std::path::Path;

use color_eyre::Result;

/// Config file name, looked up at the base-directory root
pub const CONFIG_FILE: &str = ".driftsync.toml";

/// Block (chunk) size used when the config and CLI are both silent
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Optional per-directory settings; CLI flags override these.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server address (host:port)
    pub server: Option<String>,

    /// Block size in bytes
    pub block_size: Option<usize>,
}

impl SyncConfig {
    /// Load config from the base directory.
    ///
    /// Returns defaults if `.driftsync.toml` doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(base_dir: &Path) -> Result<Self> {
        let config_path = base_dir.join(CONFIG_FILE);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
