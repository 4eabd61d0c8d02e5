//! Proxy construction options

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// How far object instances are broken down before materializing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyGranularity {
    /// One proxy per shape of an instance
    #[default]
    Fine,
    /// One proxy per (primitive, material flags) partition of an instance
    Coarse,
}

/// Options for the proxy factory and materialization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub proxy_granularity: ProxyGranularity,
    /// Visibility mask written into every geometry instance
    pub visibility_mask: u8,
    /// Select the resolved-material hit groups instead of the proxy-material ones
    pub use_resolved_materials: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            proxy_granularity: ProxyGranularity::Fine,
            visibility_mask: 255,
            use_resolved_materials: false,
        }
    }
}

impl Options {
    /// Parse options from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load options from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let options = Self::from_json_str(&data)?;
        log::info!("Loaded options from {}: {:?}", path.display(), options);
        Ok(options)
    }

    pub fn with_granularity(mut self, granularity: ProxyGranularity) -> Self {
        self.proxy_granularity = granularity;
        self
    }
}
