//! CLI configuration file.
//!
//! Settings are read from `<config dir>/lectio/config.json` unless a path
//! is given on the command line. Every field is optional; missing fields
//! take their defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use lectio_search::DEFAULT_LIMIT;

/// Directory name under the platform config and data directories.
const APP_DIR: &str = "lectio";
const CONFIG_FILE: &str = "config.json";
const DATABASE_FILE: &str = "lectio.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Base URL or directory holding `<translation>.json` documents.
    pub content_source: Option<String>,
    /// Where the local database lives.
    pub data_dir: Option<PathBuf>,
    /// Key/value backend: `sqlite` or `memory`.
    pub store_backend: String,
    pub sync_endpoint: Option<String>,
    pub sync_token: Option<String>,
    pub max_retries: u32,
    pub flush_concurrency: usize,
    pub max_resident: Option<usize>,
    pub search_limit: usize,
    /// Give up on a translation load after this many seconds.
    pub load_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            content_source: None,
            data_dir: None,
            store_backend: "sqlite".to_string(),
            sync_endpoint: None,
            sync_token: None,
            max_retries: 5,
            flush_concurrency: 1,
            max_resident: None,
            search_limit: DEFAULT_LIMIT,
            load_timeout_secs: 30,
        }
    }
}

/// Where translation documents come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    Http(Url),
    Dir(PathBuf),
}

impl AppConfig {
    /// Load the configuration.
    ///
    /// An explicit path must exist. The default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            bail!("maxRetries must be at least 1");
        }
        if self.search_limit == 0 {
            bail!("searchLimit must be at least 1");
        }
        if self.max_resident == Some(0) {
            bail!("maxResident must be at least 1");
        }
        Ok(())
    }

    /// Data directory, falling back to the platform data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(DATABASE_FILE)
    }

    /// Resolve the content source. `http(s)` URLs are fetched; anything
    /// else is a directory, defaulting to `<data dir>/translations`.
    pub fn content_source(&self) -> Result<ContentSource> {
        let Some(source) = self.content_source.as_deref() else {
            return Ok(ContentSource::Dir(self.data_dir().join("translations")));
        };

        if source.starts_with("http://") || source.starts_with("https://") {
            let url = Url::parse(source)
                .with_context(|| format!("Invalid content URL: {}", source))?;
            return Ok(ContentSource::Http(url));
        }
        Ok(ContentSource::Dir(PathBuf::from(source)))
    }

    /// Sync endpoint, required by the sync commands.
    pub fn sync_endpoint(&self) -> Result<Url> {
        let endpoint = self
            .sync_endpoint
            .as_deref()
            .context("No sync endpoint configured (set syncEndpoint or --sync-endpoint)")?;
        Url::parse(endpoint).with_context(|| format!("Invalid sync endpoint: {}", endpoint))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}
