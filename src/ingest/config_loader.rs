//! Configuration
//!
//! This module provides functionality for:
//! 1. Loading `config.toml` from the configuration directory
//! 2. Writing defaults when the file is missing or cannot be parsed
//! 3. Validating the settings before a run starts

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ingest::analyzer::dates::DateRange;
use crate::ingest::analyzer::filters::GroupPolicies;
use crate::ingest::readers::AlbumMode;
use crate::ingest::server_errors::ErrorPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Server {
    pub url: String,
    pub api_key: String,
    /// Key of an administrator, needed to pause the background jobs
    pub admin_api_key: String,
    pub device_uuid: String,
    pub skip_tls_verify: bool,
    pub client_timeout_secs: u64,
    pub api_trace: bool,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            admin_api_key: String::new(),
            device_uuid: String::new(),
            skip_tls_verify: false,
            client_timeout_secs: 300,
            api_trace: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Upload {
    pub concurrent_jobs: usize,
    pub dry_run: bool,
    pub pause_immich_jobs: bool,
    pub on_server_errors: String,
    pub overwrite: bool,
    pub tags: Vec<String>,
    pub session_tag: bool,
    pub retry_attempts: usize,
    pub base_retry_delay_ms: u64,
}

impl Default for Upload {
    fn default() -> Self {
        Self {
            concurrent_jobs: num_cpus::get().clamp(1, 20),
            dry_run: false,
            pause_immich_jobs: true,
            on_server_errors: "stop".to_string(),
            overwrite: false,
            tags: Vec::new(),
            session_tag: false,
            retry_attempts: 3,
            base_retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Stacking {
    pub manage_raw_jpeg: String,
    pub manage_heic_jpeg: String,
    pub manage_burst: String,
    pub manage_epson_fastfoto: bool,
}

impl Default for Stacking {
    fn default() -> Self {
        Self {
            manage_raw_jpeg: "NoStack".to_string(),
            manage_heic_jpeg: "NoStack".to_string(),
            manage_burst: "NoStack".to_string(),
            manage_epson_fastfoto: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Analysis {
    pub date_from_name: bool,
    pub require_date: bool,
    /// Extra ban patterns on top of the built-in ones
    pub ban_patterns: Vec<String>,
    pub include_extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub date_range: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Folder,
    GooglePhotos,
    Icloud,
    Picasa,
    Immich,
}

/// One `[[sources]]` entry; options that do not apply to the kind are ignored
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Source {
    pub kind: SourceKind,
    pub paths: Vec<String>,
    pub recursive: bool,
    pub folder_as_album: String,
    pub album_path_joiner: String,
    pub into_album: String,
    pub folder_as_tags: bool,
    pub ignore_sidecars: bool,
    pub include_unmatched: bool,
    pub include_partner: bool,
    pub include_archived: bool,
    pub include_trashed: bool,
    pub from_album_name: String,
    pub partner_shared_album: String,
    pub people_tag: bool,
    pub takeout_tag: bool,
    pub memories_as_albums: bool,
    pub server_url: String,
    pub api_key: String,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            kind: SourceKind::Folder,
            paths: Vec::new(),
            recursive: true,
            folder_as_album: "none".to_string(),
            album_path_joiner: " / ".to_string(),
            into_album: String::new(),
            folder_as_tags: false,
            ignore_sidecars: false,
            include_unmatched: false,
            include_partner: true,
            include_archived: true,
            include_trashed: false,
            from_album_name: String::new(),
            partner_shared_album: String::new(),
            people_tag: true,
            takeout_tag: true,
            memories_as_albums: false,
            server_url: String::new(),
            api_key: String::new(),
        }
    }
}

impl Source {
    fn validate(&self, index: usize) -> ConfigResult<()> {
        match self.kind {
            SourceKind::Immich => {
                if self.server_url.is_empty() || self.api_key.is_empty() {
                    return Err(invalid(format!("source {}: server_url and api_key are required", index)));
                }
            }
            _ => {
                if self.paths.is_empty() {
                    return Err(invalid(format!("source {}: no paths", index)));
                }
            }
        }
        let mode: AlbumMode = self
            .folder_as_album
            .parse()
            .map_err(|e| invalid(format!("source {}: {}", index, e)))?;
        if mode != AlbumMode::None && !self.into_album.is_empty() {
            return Err(invalid(format!(
                "source {}: into_album and folder_as_album cannot be used together",
                index
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Paths {
    pub log_directory: String,
    pub temp_directory: String,
    pub report_directory: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            log_directory: "./logs".to_string(),
            temp_directory: "./.tmp".to_string(),
            report_directory: "./reports".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_file: bool,
    /// Keep every event of every asset for the detailed report
    pub debug_events: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            log_to_file: true,
            debug_events: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: Server,
    pub upload: Upload,
    pub stacking: Stacking,
    pub analysis: Analysis,
    pub sources: Vec<Source>,
    pub paths: Paths,
    pub logging: Logging,
}

impl AppConfig {
    pub fn policies(&self) -> ConfigResult<GroupPolicies> {
        GroupPolicies::from_labels(
            &self.stacking.manage_burst,
            &self.stacking.manage_raw_jpeg,
            &self.stacking.manage_heic_jpeg,
            self.stacking.manage_epson_fastfoto,
        )
        .map_err(|e| invalid(e.to_string()))
    }

    pub fn error_policy(&self) -> ConfigResult<ErrorPolicy> {
        self.upload
            .on_server_errors
            .parse()
            .map_err(|e: crate::ingest::server_errors::InvalidPolicy| invalid(e.to_string()))
    }

    pub fn date_range(&self) -> ConfigResult<DateRange> {
        DateRange::parse(&self.analysis.date_range).map_err(|e| invalid(e.to_string()))
    }

    /// Reject settings a run cannot start with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server.url.trim().is_empty() {
            return Err(invalid("server.url is not set"));
        }
        if self.server.api_key.trim().is_empty() {
            return Err(invalid("server.api_key is not set"));
        }
        if self.sources.is_empty() {
            return Err(invalid("no [[sources]] configured"));
        }
        if !(1..=20).contains(&self.upload.concurrent_jobs) {
            warn!(
                concurrent_jobs = self.upload.concurrent_jobs,
                "concurrent_jobs outside 1..=20, clamped"
            );
        }
        self.error_policy()?;
        self.policies()?;
        self.date_range()?;
        for (i, source) in self.sources.iter().enumerate() {
            source.validate(i)?;
        }
        Ok(())
    }
}

/// Holds the configuration loaded from a directory
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        if !config_dir.exists() {
            info!(dir = %config_dir.display(), "Creating config directory");
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = Self::load_app_config(&config_dir)?;
        let manager = Self {
            app_config: Arc::new(RwLock::new(app_config)),
            config_dir,
        };
        manager.create_default_configs()?;
        Ok(manager)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    fn load_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            warn!(path = %config_path.display(), "Config file not found");
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                error!(error = %e, "Failed to parse config.toml");
                info!("Backing up old config and creating new one with default values");
                if let Err(backup_err) = fs::rename(&config_path, config_path.with_extension("toml.backup")) {
                    warn!(error = %backup_err, "Failed to backup old config");
                }
                let default_config = AppConfig::default();
                fs::write(&config_path, toml::to_string_pretty(&default_config)?)?;
                Ok(default_config)
            }
        }
    }

    pub fn get_app_config(&self) -> AppConfig {
        self.app_config.read().clone()
    }

    /// Write `config.toml` with defaults when it does not exist
    pub fn create_default_configs(&self) -> ConfigResult<()> {
        let config_path = self.config_path();
        if !config_path.exists() {
            let default_config = AppConfig::default();
            fs::write(&config_path, toml::to_string_pretty(&default_config)?)?;
            *self.app_config.write() = default_config;
            info!(path = %config_path.display(), "Created default config");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.url = "http://localhost:2283".to_string();
        config.server.api_key = "key".to_string();
        config.sources.push(Source {
            paths: vec!["./photos".to_string()],
            ..Default::default()
        });
        config
    }

    #[test]
    fn test_defaults_written() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();
        assert!(manager.config_path().exists());

        let reloaded = ConfigManager::new(dir.path()).unwrap().get_app_config();
        assert_eq!(reloaded.upload.on_server_errors, "stop");
        assert_eq!(reloaded.stacking.manage_burst, "NoStack");
    }

    #[test]
    fn test_partial_file_and_sources() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            r#"
[server]
url = "https://photos.example.com"
api_key = "secret"

[upload]
on_server_errors = "3"

[[sources]]
kind = "google_photos"
paths = ["takeout-*.zip"]
include_unmatched = true
"#,
        )
        .unwrap();

        let config = ConfigManager::new(dir.path()).unwrap().get_app_config();
        assert_eq!(config.server.client_timeout_secs, 300);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].kind, SourceKind::GooglePhotos);
        assert!(config.sources[0].include_unmatched);
        assert!(config.sources[0].takeout_tag);
        assert_eq!(config.error_policy().unwrap(), ErrorPolicy::Budget(3));
        config.validate().unwrap();
    }

    #[test]
    fn test_unparseable_file_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.toml"), "[server\nurl = ").unwrap();

        let config = ConfigManager::new(dir.path()).unwrap().get_app_config();
        assert!(config.server.url.is_empty());
        assert!(dir.path().join("config.toml.backup").exists());
        assert!(dir.path().join("config.toml").exists());
    }

    #[test]
    fn test_validate() {
        valid().validate().unwrap();

        let mut config = valid();
        config.server.api_key.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = valid();
        config.sources.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.upload.on_server_errors = "sometimes".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.stacking.manage_burst = "KeepHeic".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sources[0].folder_as_album = "folder".to_string();
        config.sources[0].into_album = "All".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sources.push(Source {
            kind: SourceKind::Immich,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }
}
