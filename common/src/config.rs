//! Configuration shared by both binaries.
//!
//! Every value has a default, so a config file only needs to name what it changes:
//!
//! ```toml
//! [model]
//! width = 96
//! height = 96
//!
//! [cache]
//! name = "ei-cache-v2"
//! assets = ["index.html", "main.js"]
//! ```
use std::path::Path;

use serde::Deserialize;

/// Input width of the classifier.
pub const MODEL_WIDTH: u32 = 96;
/// Input height of the classifier.
pub const MODEL_HEIGHT: u32 = 96;

/// Largest accepted model width or height.
pub const MAX_MODEL_SIDE: u32 = 4096;
/// Accepted range of the frame clock rate in Hz.
pub const REFRESH_HZ_RANGE: std::ops::RangeInclusive<f64> = 0.01..=1000.0;

/// Name of the cache store. Change it to invalidate previously installed assets.
pub const CACHE_NAME: &str = "ei-cache-v1";

/// Assets installed into the cache store.
pub const ASSETS: [&str; 6] = [
    "index.html",
    "main.js",
    "edge-impulse-standalone.js",
    "wasm_compiled.wasm",
    "manifest.json",
    "icon.png",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Rate of the frame clock driving the inference loop.
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_name")]
    pub name: String,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            refresh_hz: default_refresh_hz(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: default_cache_name(),
            assets: default_assets(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let sides = 1..=MAX_MODEL_SIDE;
        if !sides.contains(&config.model.width) || !sides.contains(&config.model.height) {
            return Err(ConfigError::Invalid(format!(
                "model size must be between 1 and {MAX_MODEL_SIDE}"
            )));
        }
        // Also rejects nan and inf
        if !REFRESH_HZ_RANGE.contains(&config.model.refresh_hz) {
            return Err(ConfigError::Invalid(format!(
                "refresh rate must be between {} and {} Hz",
                REFRESH_HZ_RANGE.start(),
                REFRESH_HZ_RANGE.end()
            )));
        }
        if config.cache.name.is_empty() {
            return Err(ConfigError::Invalid("cache name must not be empty".into()));
        }
        Ok(config)
    }

    /// Load the file at `path` if given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_width() -> u32 {
    MODEL_WIDTH
}
fn default_height() -> u32 {
    MODEL_HEIGHT
}
fn default_refresh_hz() -> f64 {
    60.0
}
fn default_cache_name() -> String {
    CACHE_NAME.into()
}
fn default_assets() -> Vec<String> {
    ASSETS.iter().map(|asset| asset.to_string()).collect()
}
