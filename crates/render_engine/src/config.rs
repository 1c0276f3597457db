//! Engine configuration, loadable from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderEngineConfig {
    /// Upper bound on cached groups; the least recently returned group is
    /// released first. `None` keeps one entry per distinct size ever requested.
    pub max_cached_groups: Option<usize>,
    /// Clear a group to transparent when it becomes the draw target.
    pub clear_groups_on_begin: bool,
    /// Linear filtering when a finished group is composited back.
    pub group_texture_filtering: bool,
}

impl Default for RenderEngineConfig {
    fn default() -> Self {
        Self {
            max_cached_groups: None,
            clear_groups_on_begin: true,
            group_texture_filtering: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("max_cached_groups must be at least 1 when set")]
    ZeroCacheBound,
}

impl RenderEngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: RenderEngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cached_groups == Some(0) {
            return Err(ConfigError::ZeroCacheBound);
        }
        Ok(())
    }
}
