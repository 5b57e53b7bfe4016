use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::media::catalog::{CatalogOptions, DEFAULT_DIRECTORY_FILTER};
use crate::media::metadata::{ExtractorOptions, DEFAULT_MAX_CONCURRENT_PROBES, DEFAULT_PROBE_OFFSET};
use crate::store::JsonFileMap;

const DEFAULT_FFMPEG: &str = "ffmpeg";

#[derive(Deserialize, Default, Debug)]
pub struct FileConfig {
    pub directory_filter: Option<String>,
    pub probe_offset_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
    pub max_concurrent_probes: Option<usize>,
    pub store_path: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Config {
    pub directory_filter: String,
    pub probe_offset: Duration,
    pub probe_timeout: Option<Duration>,
    pub max_concurrent_probes: usize,
    /// None when neither flag, file nor platform provides a location.
    pub store_path: Option<PathBuf>,
    pub ffmpeg: PathBuf,
}

impl Config {
    /// Layer defaults, then the config file, then command-line flags.
    pub fn resolve(file: Option<FileConfig>, args: &crate::cli::Args) -> Self {
        let file = file.unwrap_or_default();
        Config {
            directory_filter: args
                .filter
                .clone()
                .or(file.directory_filter)
                .unwrap_or_else(|| DEFAULT_DIRECTORY_FILTER.to_string()),
            probe_offset: args
                .probe_offset
                .or(file.probe_offset_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_PROBE_OFFSET),
            probe_timeout: file.probe_timeout_secs.map(Duration::from_secs),
            max_concurrent_probes: file
                .max_concurrent_probes
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_PROBES),
            store_path: args
                .store
                .clone()
                .or(file.store_path)
                .or_else(JsonFileMap::default_path),
            ffmpeg: file.ffmpeg.unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
        }
    }

    pub fn catalog_options(&self) -> CatalogOptions {
        CatalogOptions {
            directory_filter: self.directory_filter.clone(),
        }
    }

    pub fn extractor_options(&self) -> ExtractorOptions {
        ExtractorOptions {
            probe_offset: self.probe_offset,
            probe_timeout: self.probe_timeout,
            max_concurrent_probes: self.max_concurrent_probes,
        }
    }
}

pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_owned());
    }
    let cwd_config = PathBuf::from("reprise.toml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let xdg_config = config_dir.join("reprise").join("config.toml");
        if xdg_config.exists() {
            return Some(xdg_config);
        }
    }
    None
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&content)?;
    Ok(config)
}
