use crate::{AppError, Result};
use directories::ProjectDirs;
use keel_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSettings,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub name: String,
    /// "development", "staging", "production", ...
    pub environment: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "keel".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl AppSettings {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

impl AppConfig {
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_file.exists() {
            info!("Loading config from: {}", config_file.display());
            let content = tokio::fs::read_to_string(&config_file).await?;
            toml::from_str(&content).map_err(|e| AppError::Config {
                message: format!("Failed to parse {}: {}", config_file.display(), e),
            })?
        } else {
            info!("No config file found, using defaults");
            Self::default()
        };

        config.load_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;
        tokio::fs::write(&config_file, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.name.trim().is_empty() {
            return Err(AppError::Config {
                message: "app.name must not be empty".to_string(),
            });
        }
        self.telemetry.validate()?;
        Ok(())
    }

    fn default_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("dev", "keel", "keel").ok_or_else(|| {
            AppError::Config {
                message: "Could not determine config directory".to_string(),
            }
        })?;

        Ok(project_dirs.config_dir().join("config.toml"))
    }

    fn load_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("KEEL_APP_NAME") {
            self.app.name = name;
        }
        if let Ok(environment) = std::env::var("KEEL_ENVIRONMENT") {
            self.app.environment = environment;
        }

        self.telemetry.load_env_overrides();
    }
}
