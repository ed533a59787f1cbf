//! # Configuration
//!
//! TOML configuration for the world service binary and for embedders that
//! want the same defaults.
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//! flush_every_write = true
//!
//! [logging]
//! level = "info"
//! file = "worldgraph.log"
//!
//! [world]
//! max_lock_difficulty = 50
//! max_trap_difficulty = 50
//! default_condition = 100
//! seed_file = "data/seeds/world.json"
//! ```
//!
//! Every section and field has a default, so a partial file (or an empty
//! one) is valid.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

use crate::world::exits::ExitLimits;
use crate::world::types::FULL_CONDITION;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub world: WorldConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Flush sled to disk after every committed mutation.
    #[serde(default = "default_true")]
    pub flush_every_write: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            flush_every_write: true,
        }
    }
}

impl StorageConfig {
    /// Directory holding the sled database.
    pub fn world_db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("world")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Parse `level`, falling back to `Info` on anything unrecognised.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_difficulty")]
    pub max_lock_difficulty: u8,
    #[serde(default = "default_difficulty")]
    pub max_trap_difficulty: u8,
    /// Condition given to new item instances.
    #[serde(default = "default_condition")]
    pub default_condition: i32,
    /// JSON seed applied when the store holds no rooms yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_difficulty() -> u8 {
    50
}

fn default_condition() -> i32 {
    FULL_CONDITION
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_lock_difficulty: default_difficulty(),
            max_trap_difficulty: default_difficulty(),
            default_condition: default_condition(),
            seed_file: None,
        }
    }
}

impl WorldConfig {
    pub fn exit_limits(&self) -> ExitLimits {
        ExitLimits {
            max_lock_difficulty: self.max_lock_difficulty,
            max_trap_difficulty: self.max_trap_difficulty,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}
