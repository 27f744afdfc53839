use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::extractor::{self, Config as ExtractorConfig, Registry};

/// On-disk configuration document.
///
/// Unknown providers in `extractors` pass through untouched; a missing
/// provider table or a wrongly-typed value is fatal at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default)]
    pub extractors: ExtractorConfig,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            extractors: extractor::builtin_registry().default_config(),
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot find home directory".into()))?;
        Ok(home.join(".troubadour"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn load(registry: &Registry) -> Result<Self> {
        let content = std::fs::read_to_string(Self::config_path()?)?;
        let config: Self = serde_json::from_str(&content)?;
        registry.check_validity(&config.extractors)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(Self::config_dir()?)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::config_path()?, content)?;
        Ok(())
    }
}
