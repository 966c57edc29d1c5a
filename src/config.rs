use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::Result;

/// Runtime configuration loaded from `config.toml`. Every section has
/// defaults so the binary runs without a file; the file overrides per key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub sanitizer: SanitizerSettings,
    pub training: TrainingSettings,
    pub promotion: PromotionSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Source A: the bulk auction listing file.
    pub baanknet_file: String,
    /// Source B: directory of per-property detail files.
    pub property_details_dir: String,
    /// Directory for task artifacts (normalized snapshot, bundles).
    pub output_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            baanknet_file: "data/baanknet_property_details.json".to_string(),
            property_details_dir: "data/property_details".to_string(),
            output_dir: "output".to_string(),
        }
    }
}

impl DataConfig {
    pub fn normalized_file(&self) -> String {
        Path::new(&self.output_dir)
            .join("normalized.ndjson")
            .to_string_lossy()
            .to_string()
    }

    pub fn bundle_file(&self) -> String {
        Path::new(&self.output_dir)
            .join("bundle.json")
            .to_string_lossy()
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SanitizerSettings {
    /// IQR multiplier for outlier bounds.
    pub iqr_k: f64,
    /// Cap out-of-range values instead of only flagging.
    pub winsorize: bool,
}

impl Default for SanitizerSettings {
    fn default() -> Self {
        Self {
            iqr_k: 1.5,
            winsorize: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Ridge regularization strength.
    pub l2: f64,
    /// Share of priced records held out for evaluation.
    pub holdout_fraction: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            l2: 1.0,
            holdout_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromotionSettings {
    /// Required fractional RMSE improvement over the champion.
    pub min_rmse_margin: f64,
}

impl Default for PromotionSettings {
    fn default() -> Self {
        Self {
            min_rmse_margin: 0.01,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    /// Service-boundary deadline for the inference step.
    pub predict_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            predict_timeout_ms: 2_000,
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to the
    /// built-in defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";
        if !Path::new(config_path).exists() {
            info!("no {config_path} found, using default configuration");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
