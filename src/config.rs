//! Runtime configuration passed explicitly to sources and exporters.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PanelError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Flat spreadsheet read by the interactive front end.
    pub spreadsheet_path: PathBuf,
    /// SQLite database read by the request front end.
    pub database_path: PathBuf,
    /// Table holding `AreaCode, Level, Catalog, Y<year>...`.
    pub table: String,
    /// Where exported artifacts are written.
    pub download_dir: PathBuf,
    /// URL prefix under which `download_dir` is served.
    pub download_url_prefix: String,
    /// Artifacts older than this are removed by the start-up sweep.
    pub retention_hours: u64,
    pub first_year: i32,
    pub last_year: i32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            spreadsheet_path: PathBuf::from("resources/县级行政区划1980-2023.xlsx"),
            database_path: PathBuf::from("adminarea.db"),
            table: "adminarea".to_string(),
            download_dir: PathBuf::from("static/downloads"),
            download_url_prefix: "/xzqh/static/downloads".to_string(),
            retention_hours: 24,
            first_year: 1980,
            last_year: 2023,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|e| {
            PanelError::InvalidRequest(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&text).map_err(|e| {
            PanelError::InvalidRequest(format!("invalid config {}: {}", path.display(), e))
        })?;
        if config.first_year > config.last_year {
            return Err(PanelError::InvalidRequest(format!(
                "config first_year {} is after last_year {}",
                config.first_year, config.last_year
            )));
        }
        Ok(config)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 60 * 60)
    }
}
