// Configuration: optional TOML file, then .env / process environment on top

use crate::error::{ImportError, ImportResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "apartment-finder.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub importer: ImporterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("apartments.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory with a prebuilt web client, served under /static when set
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3002,
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Key for the apartment trade (RTMS) API
    pub public_data_api_key: Option<String>,
    /// Key for the legal-dong region code (StanReginCd) API
    pub legal_dong_api_key: Option<String>,
    pub years: Vec<i32>,
    pub page_size: u32,
    pub region_delay_ms: u64,
    pub trade_delay_ms: u64,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            public_data_api_key: None,
            legal_dong_api_key: None,
            years: vec![2024],
            page_size: 1000,
            region_delay_ms: 200,
            trade_delay_ms: 1000,
            concurrency: 4,
            timeout_secs: 30,
        }
    }
}

impl ImporterConfig {
    pub fn region_delay(&self) -> Duration {
        Duration::from_millis(self.region_delay_ms)
    }

    pub fn trade_delay(&self) -> Duration {
        Duration::from_millis(self.trade_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn require_public_data_key(&self) -> ImportResult<&str> {
        self.public_data_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ImportError::Config("PUBLIC_DATA_API_KEY is not set".to_string()))
    }

    pub fn require_legal_dong_key(&self) -> ImportResult<&str> {
        self.legal_dong_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ImportError::Config("LEGAL_DONG_API_KEY is not set".to_string()))
    }
}

impl Config {
    /// Load `.env`, the TOML file (if it exists) and environment overrides.
    ///
    /// An explicitly passed path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Environment wins over the file
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(key) = lookup("PUBLIC_DATA_API_KEY") {
            self.importer.public_data_api_key = Some(key);
        }
        if let Some(key) = lookup("LEGAL_DONG_API_KEY") {
            self.importer.legal_dong_api_key = Some(key);
        }
    }
}
