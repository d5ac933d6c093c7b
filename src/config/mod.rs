// sheetbackup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/app.db";
const DEFAULT_LOCAL_BACKUP_DIR: &str = "backups";
pub const DEFAULT_BITRIX_BASE_PATH: &str = "backup_google_sheets";

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonBitrixConfig {
    pub webhook_url: Option<String>,
    pub folder_id: Option<String>,
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub database_url: Option<String>,
    pub google_access_token: Option<String>,
    pub local_backup_dir: Option<PathBuf>,
    pub bitrix: Option<JsonBitrixConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct BitrixConfig {
    pub webhook_url: String,
    pub folder_id: Option<String>,
    pub base_path: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub google_access_token: Option<String>,
    pub local_backup_dir: PathBuf,
    pub bitrix: Option<BitrixConfig>,
}

impl AppConfig {
    /// Loads config.json and applies environment overrides
    /// (DATABASE_URL, GOOGLE_ACCESS_TOKEN).
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let raw: RawJsonConfig = if config_path.exists() {
            let config_content = fs::read_to_string(config_path).with_context(|| {
                format!("Failed to read config file at {}", config_path.display())
            })?;
            serde_json::from_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            RawJsonConfig {
                database_url: None,
                google_access_token: None,
                local_backup_dir: None,
                bitrix: None,
            }
        };

        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawJsonConfig) -> Self {
        Self::from_raw_with_env(
            raw,
            env::var("DATABASE_URL").ok(),
            env::var("GOOGLE_ACCESS_TOKEN").ok(),
        )
    }

    fn from_raw_with_env(
        raw: RawJsonConfig,
        env_database_url: Option<String>,
        env_access_token: Option<String>,
    ) -> Self {
        let database_url = env_database_url
            .filter(|s| !s.is_empty())
            .or_else(|| raw.database_url.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let google_access_token = env_access_token
            .filter(|s| !s.is_empty())
            .or_else(|| raw.google_access_token.clone().filter(|s| !s.is_empty()));

        let local_backup_dir = raw
            .local_backup_dir
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_BACKUP_DIR));

        let bitrix = raw.bitrix.as_ref().and_then(|b| {
            if let Some(webhook_url) = b.webhook_url.as_ref().filter(|s| !s.is_empty()) {
                Some(BitrixConfig {
                    webhook_url: webhook_url.clone(),
                    folder_id: b.folder_id.clone().filter(|s| !s.is_empty()),
                    base_path: b
                        .base_path
                        .clone()
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| DEFAULT_BITRIX_BASE_PATH.to_string()),
                })
            } else {
                if b.folder_id.is_some() || b.base_path.is_some() {
                    // Partial bitrix section without the one required field.
                    println!(
                        "Bitrix configuration is present in config.json but webhook_url is missing or empty. Bitrix storage will only be available through saved integrations."
                    );
                }
                None
            }
        });

        AppConfig {
            database_url,
            google_access_token,
            local_backup_dir,
            bitrix,
        }
    }
}
