//! Configuration and settings management
//!
//! Loads relay settings from config files and environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default download endpoint; the file identifier is passed as `id`.
pub const DEFAULT_DOWNLOAD_API_URL: &str = "https://apis.forn.fun/tera/data.php";
/// Default upper bound on a single download request, in seconds.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;
/// Substring that marks a message as a supported link.
pub const DEFAULT_LINK_MARKER: &str = "terabox";
/// Root directory for per-user activity logs.
pub const DEFAULT_LOG_DIR: &str = "logs";
/// Suffix appended to every document caption.
pub const DEFAULT_CAPTION_TAG: &str = "@teraboxtt01_bot";

/// Build the layered configuration shared by every settings struct.
///
/// Sources, later ones winning: `config/default`, `config/<RUN_MODE>`,
/// `config/local`, `APP__*` variables, then plain environment variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE is mapped to snake_case; empty vars count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

/// Settings for the download-and-relay pipeline
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelaySettings {
    /// Download endpoint queried with `?id=<file id>`
    #[serde(default = "default_download_api_url")]
    pub download_api_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Substring a message must contain to be treated as a link
    #[serde(default = "default_link_marker")]
    pub link_marker: String,
    /// Root directory of the activity logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Directory for temporary downloads, OS temp dir when unset
    pub download_dir: Option<PathBuf>,
    /// Tag appended to the caption of every relayed file
    #[serde(default = "default_caption_tag")]
    pub caption_tag: String,
}

fn default_download_api_url() -> String {
    DEFAULT_DOWNLOAD_API_URL.to_string()
}

const fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_link_marker() -> String {
    DEFAULT_LINK_MARKER.to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

fn default_caption_tag() -> String {
    DEFAULT_CAPTION_TAG.to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            download_api_url: default_download_api_url(),
            download_timeout_secs: default_download_timeout_secs(),
            link_marker: default_link_marker(),
            log_dir: default_log_dir(),
            download_dir: None,
            caption_tag: default_caption_tag(),
        }
    }
}

impl RelaySettings {
    /// Load relay settings from files and environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Download timeout as a [`Duration`]
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Directory where temporary downloads are written
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
