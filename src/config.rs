//! TOML configuration file support.
//!
//! Deployments can pin engine settings in a config file instead of flags:
//!
//! ```toml
//! # mzflow.toml
//! [scheduler]
//! num_workers = 8
//!
//! [storage]
//! backing = "temp_file"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::scheduler::SchedulerConfig;
use crate::storage::ArenaBacking;

/// Root configuration structure for mzflow.toml files.
#[derive(Debug, Default, Deserialize)]
pub struct EngineConfig {
    /// Worker pool settings.
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Storage arena settings.
    #[serde(default)]
    pub storage: StorageSection,
}

/// `[scheduler]` section.
#[derive(Debug, Default, Deserialize)]
pub struct SchedulerSection {
    /// Maximum number of tasks running in parallel. Defaults to the number
    /// of available cores.
    pub num_workers: Option<usize>,
}

/// `[storage]` section.
#[derive(Debug, Default, Deserialize)]
pub struct StorageSection {
    /// Arena backing: `"temp_file"` or `"memory"`.
    pub backing: Option<ArenaBacking>,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Resolve the scheduler configuration, falling back to defaults.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            num_workers: self.scheduler.num_workers.unwrap_or(defaults.num_workers),
        }
    }

    /// Resolve the arena backing, falling back to the temp-file default.
    pub fn arena_backing(&self) -> ArenaBacking {
        self.storage.backing.unwrap_or_default()
    }
}
