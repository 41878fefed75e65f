use anyhow::{Context, Result};
use directories::ProjectDirs;
use minds_link_core::ports::{AppConfig, ConfigStore};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// File-based configuration store that implements ConfigStore
pub struct FileConfigStore {
    config_path: PathBuf,
}

impl FileConfigStore {
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    pub fn with_path<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "minds-link")
            .context("Failed to determine project directories")?;
        Ok(proj_dirs.config_dir().join("minds-link.toml"))
    }

    fn read(&self) -> Result<AppConfig> {
        let contents = fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;
        toml::from_str(&contents).with_context(|| {
            format!("Failed to parse config file: {}", self.config_path.display())
        })
    }
}

impl ConfigStore for FileConfigStore {
    /// Load the config, creating it with defaults on first use
    ///
    /// A missing client id is generated and written back so delta status
    /// responses keep working across runs.
    fn load(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("Creating default config at {}", self.config_path.display());
            self.save(&AppConfig::default())?;
        }

        let mut config = self.read()?;
        if config.backend.client_id.is_none() {
            config.backend.client_id = Some(uuid::Uuid::new_v4().to_string());
            self.save(&config)?;
        }
        Ok(config)
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents =
            toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;
        fs::write(&self.config_path, contents).with_context(|| {
            format!("Failed to write config file: {}", self.config_path.display())
        })
    }
}
