//! Backend configuration
//!
//! Every field has a default, so an empty file (or no file at all) gives
//! the stock behaviour.

use crate::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a TOML config file
pub const CONFIG_ENV: &str = "KMS_FRAMEBUFFER_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Directory holding the cardN nodes
    #[serde(default = "default_device_dir")]
    pub device_dir: PathBuf,
    /// Card minors 0..max_minor are probed in order
    #[serde(default = "default_max_minor")]
    pub max_minor: u32,
    /// Main plus secondary outputs
    #[serde(default = "default_max_outputs")]
    pub max_outputs: usize,
    /// Connector blob property carrying the panel topology text
    #[serde(default = "default_topology_property")]
    pub topology_property: String,
}

fn default_device_dir() -> PathBuf { PathBuf::from("/dev/dri") }
fn default_max_minor() -> u32 { 64 }
fn default_max_outputs() -> usize { 2 }
fn default_topology_property() -> String { "mode_properties".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            device_dir: default_device_dir(),
            max_minor: default_max_minor(),
            max_outputs: default_max_outputs(),
            topology_property: default_topology_property(),
        }
    }
}

impl Config {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::parse(&contents)?;
        tracing::info!("Loaded backend config from {:?}", path);
        Ok(config)
    }

    /// Load the file named by `KMS_FRAMEBUFFER_CONFIG`, or the defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_outputs == 0 {
            return Err(Error::Config("max_outputs must be at least 1".into()));
        }
        if self.max_minor == 0 {
            return Err(Error::Config("max_minor must be at least 1".into()));
        }
        Ok(())
    }

    /// Path of card node `minor`
    pub fn card_path(&self, minor: u32) -> PathBuf {
        self.device_dir.join(format!("card{}", minor))
    }
}
