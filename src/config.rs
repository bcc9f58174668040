use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{ChipInfo, ChipModeCatalog};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Interface name looked up in the service directory.
    pub service_name: String,
    pub service_instance: String,
    /// Extra `start` attempts after a "not available" status.
    pub start_retry_times: u32,
    pub start_retry_interval_ms: u64,
    /// Chip catalog used by the simulator, if not the built-in one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            service_name: "radio.hal@1.0::IRadio".to_string(),
            service_instance: "default".to_string(),
            start_retry_times: 3,
            start_retry_interval_ms: 20,
            catalog: None,
        }
    }
}

impl ManagerConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(ManagerConfig::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn start_retry_interval(&self) -> Duration {
        Duration::from_millis(self.start_retry_interval_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?;
    Ok(config_dir.join("radio-manager").join("config.toml"))
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    chips: Vec<ChipInfo>,
}

/// Reads a chip catalog: a list of `[[chips]]` tables with nested modes.
pub fn load_catalog(path: &Path) -> Result<ChipModeCatalog> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;

    let file: CatalogFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse catalog file: {}", path.display()))?;

    if file.chips.is_empty() {
        anyhow::bail!("Catalog file {} declares no chips", path.display());
    }
    Ok(ChipModeCatalog::new(file.chips))
}
