use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::curation::{WindowParams, DEFAULT_EPISODE_CAP, DEFAULT_WINDOW_HOURS};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Trailing window before an episode's creation time, in hours.
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,

    #[serde(default = "default_episode_article_cap")]
    pub episode_article_cap: usize,

    /// Users reconciled at the same time during a backfill.
    #[serde(default = "default_backfill_concurrency")]
    pub backfill_concurrency: usize,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("news-curator");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("curator.db").to_string_lossy().to_string()
}

fn default_window_hours() -> i64 {
    DEFAULT_WINDOW_HOURS
}

fn default_episode_article_cap() -> usize {
    DEFAULT_EPISODE_CAP
}

fn default_backfill_concurrency() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            window_hours: default_window_hours(),
            episode_article_cap: default_episode_article_cap(),
            backfill_concurrency: default_backfill_concurrency(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Reads the config at `path`, writing the defaults there first if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("news-curator")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        self.window_params()?;
        if self.backfill_concurrency == 0 {
            return Err(AppError::Validation(
                "backfill_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn window_params(&self) -> Result<WindowParams> {
        WindowParams::from_hours(self.window_hours, self.episode_article_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).expect("load must succeed");

        assert!(path.exists());
        assert_eq!(config.window_hours, 48);
        assert_eq!(config.episode_article_cap, 10);
        assert_eq!(config.window_params().unwrap(), WindowParams::default());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "db_path = \"/tmp/x.db\"\nwindow_hours = 24\n").unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.db_path, "/tmp/x.db");
        assert_eq!(config.window_hours, 24);
        assert_eq!(config.episode_article_cap, 10);
        assert_eq!(config.backfill_concurrency, 4);
    }

    #[test]
    fn invalid_window_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "db_path = \"x.db\"\nwindow_hours = -6\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(AppError::Validation(_))));
    }

    #[test]
    fn zero_cap_is_rejected() {
        let config = Config {
            episode_article_cap: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
