use serde::Deserialize;
use std::{fs, path::PathBuf};
use toml;
use std::sync::OnceLock;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigLoadingError {
    #[error("Failed to read the config (./config.toml): {0}")]
    FailedToReadConfig(String),

    #[error("Failed to parse the config: {0}")]
    FailedToParseConfig(#[from] toml::de::Error)
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub organize: OrganizeConfig,
    pub import: ImportConfig,
    #[serde(default)]
    pub itunes: ItunesConfig,
    #[serde(default)]
    pub fileops: FileOpsConfig
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_migrations_path")]
    pub migrations_path: PathBuf
}

#[derive(Debug, Deserialize)]
pub struct OrganizeConfig {
    pub root_dir: PathBuf,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_folder_pattern")]
    pub folder_pattern: String,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String
}

#[derive(Debug, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub skip_duplicates: bool,
    #[serde(default)]
    pub import_playlists: bool
}

#[derive(Debug, Default, Deserialize)]
pub struct ItunesConfig {
    pub library_path: Option<PathBuf>
}

#[derive(Debug, Deserialize)]
pub struct FileOpsConfig {
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    pub backup_dir: Option<PathBuf>
}

impl Default for FileOpsConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            max_backups: default_max_backups(),
            backup_dir: None
        }
    }
}

fn default_true() -> bool { true }
fn default_max_backups() -> usize { 3 }
fn default_migrations_path() -> PathBuf { PathBuf::from("./data/db/migrations") }
fn default_strategy() -> String { "copy".to_string() }
fn default_folder_pattern() -> String { "{author}/{series}/{title}".to_string() }
fn default_file_pattern() -> String { "{title}".to_string() }

impl Config {
    pub fn load() -> Result<Self, ConfigLoadingError> {
        let config_str = fs::read_to_string("config.toml").map_err(|err| ConfigLoadingError::FailedToReadConfig(err.to_string()))?;
        let config: Config = toml::from_str(&config_str)?;

        Ok(config)
    }
}

pub fn get_config() -> Result<&'static Config, ConfigLoadingError> {
    static CONFIG: OnceLock<Result<Config, ConfigLoadingError>> = OnceLock::new();

    let result = CONFIG.get_or_init(|| {
        Config::load()
    });

    match result {
        Ok(config) => Ok(config),
        Err(err) => Err(err.clone())
    }
}
