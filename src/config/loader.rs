use super::TopKConfig;
use crate::error::{Error, Result};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Layers configuration sources on top of the defaults
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: TopKConfig,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace current settings with those of a TOML file.
    ///
    /// Keys absent from the file keep their default values.
    pub async fn load_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).await?;
        self.config = TopKConfig::from_toml_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(())
    }

    pub fn merge_env_vars(&mut self) {
        self.config.merge_env_vars();
    }

    pub fn config(&self) -> &TopKConfig {
        &self.config
    }

    pub fn into_config(self) -> TopKConfig {
        self.config
    }
}

/// Load defaults, an optional file, and environment overrides
pub async fn load_config(path: Option<&Path>) -> Result<TopKConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader.load_file(path).await?;
    }
    loader.merge_env_vars();
    Ok(loader.into_config())
}
