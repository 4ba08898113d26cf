// src/config.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::integrity::HashAlgorithm;
use crate::scheduler::{DEFAULT_MAX_FILES_PER_GROUP, DEFAULT_MAX_PARALLEL_GROUPS};

pub const DEFAULT_CDN_ROOT: &str = "http://static.cdn.ea.com/blackbox/u/f/NFSWO";
pub const DEFAULT_VERSION: &str = "1614b";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown package {0:?}")]
    UnknownPackage(String),
}

/// Tuning knobs of the loader itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoaderConfig {
    pub max_parallel_groups: usize,
    pub max_files_per_group: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Forces one hash algorithm instead of detecting it per file.
    pub hash_algorithm: Option<HashAlgorithm>,
    /// SQLite file recording downloaded hashes. Kept in memory when unset.
    pub hash_db: Option<PathBuf>,
    /// Run a verification pass over each package once it is downloaded.
    pub verify_after_download: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_parallel_groups: DEFAULT_MAX_PARALLEL_GROUPS,
            max_files_per_group: DEFAULT_MAX_FILES_PER_GROUP,
            request_timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            hash_algorithm: None,
            hash_db: None,
            verify_after_download: true,
        }
    }
}

impl LoaderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// One independently indexed part of the game data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Package {
    /// Executables and base data.
    Base,
    Tracks,
    TracksHigh,
    /// Speech files of the configured language.
    Speech,
}

impl Package {
    /// Path segment of the package below `client/`, ending in `/` unless empty.
    pub fn segment(&self, language: &str) -> String {
        match self {
            Package::Base => String::new(),
            Package::Tracks => "Tracks/".to_string(),
            Package::TracksHigh => "TracksHigh/".to_string(),
            Package::Speech => format!("{language}/"),
        }
    }

    /// Name under which the package's hashes are stored.
    pub fn store_name(&self, language: &str) -> String {
        match self {
            Package::Base => "base".to_string(),
            Package::Tracks => "tracks".to_string(),
            Package::TracksHigh => "trackshigh".to_string(),
            Package::Speech => format!("speech-{language}"),
        }
    }
}

impl FromStr for Package {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(Package::Base),
            "tracks" => Ok(Package::Tracks),
            "trackshigh" => Ok(Package::TracksHigh),
            "speech" => Ok(Package::Speech),
            other => Err(ConfigError::UnknownPackage(other.to_string())),
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Package::Base => "base",
            Package::Tracks => "tracks",
            Package::TracksHigh => "trackshigh",
            Package::Speech => "speech",
        };
        f.write_str(name)
    }
}

/// What to download and where to put it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CdnOptions {
    pub game_dir: PathBuf,
    pub version: String,
    pub language: String,
    pub packages: Vec<Package>,
    pub cdn_root: String,
}

impl Default for CdnOptions {
    fn default() -> Self {
        Self {
            game_dir: PathBuf::from("."),
            version: DEFAULT_VERSION.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            packages: vec![Package::Base, Package::Tracks, Package::Speech],
            cdn_root: DEFAULT_CDN_ROOT.to_string(),
        }
    }
}

impl CdnOptions {
    /// e.g. `{cdn_root}/1614b/client/Tracks/index.xml`
    pub fn index_url(&self, package: Package) -> String {
        format!(
            "{}/{}/client/{}index.xml",
            self.cdn_root.trim_end_matches('/'),
            self.version,
            package.segment(&self.language)
        )
    }
}

/// Both halves of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub loader: LoaderConfig,
    pub cdn: CdnOptions,
}

impl Settings {
    pub async fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}
