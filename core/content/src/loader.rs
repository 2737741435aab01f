//! Translation loaders: fetch a translation document and parse it.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::data::TranslationData;
use lectio_common::{Error, Result, RetryConfig, RetryExecutor, TranslationId};

/// Source of translation documents.
///
/// Implementations resolve `<id>.json` against their static location.
/// A missing document or a parse failure is reported as `LoadFailed`.
#[async_trait]
pub trait TranslationLoader: Send + Sync {
    /// Loader name for logs (e.g., "http", "dir").
    fn name(&self) -> &str;

    /// Fetch and parse one translation.
    ///
    /// # Errors
    /// - `LoadFailed` for missing documents and malformed content
    /// - `Network` if the transport keeps failing after retries
    async fn fetch(&self, id: &TranslationId) -> Result<TranslationData>;
}

/// Loads `GET <base>/<id>.json` over HTTP.
pub struct HttpLoader {
    http: Client,
    base: Url,
    retry: RetryExecutor,
}

impl HttpLoader {
    /// Create a loader for a static base URL.
    ///
    /// # Errors
    /// - Base URL cannot be a base (e.g. `mailto:`)
    /// - HTTP client construction failure
    pub fn new(base: Url) -> Result<Self> {
        Self::with_retry(base, RetryConfig::default())
    }

    /// Create a loader with a custom retry policy for transient failures.
    pub fn with_retry(mut base: Url, retry: RetryConfig) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "Translation base URL cannot be a base: {}",
                base
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(concat!("Lectio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            retry: RetryExecutor::new(retry),
        })
    }

    /// URL of the document for a translation.
    pub fn document_url(&self, id: &TranslationId) -> Result<Url> {
        self.base
            .join(&format!("{}.json", id))
            .map_err(|e| Error::InvalidInput(format!("Invalid document URL for {}: {}", id, e)))
    }

    async fn fetch_once(&self, id: &TranslationId, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Network(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::Network(format!("GET {} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(Error::load_failed(id.as_str(), format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Reading {} failed: {}", url, e)))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl TranslationLoader for HttpLoader {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, id: &TranslationId) -> Result<TranslationData> {
        let url = self.document_url(id)?;
        debug!(%url, "fetching translation");

        let body = self.retry.execute(|| self.fetch_once(id, &url)).await?;
        let data = TranslationData::parse(id, &body)?;

        info!(translation = %id, verses = data.verse_count(), "translation fetched");
        Ok(data)
    }
}

/// Loads `<root>/<id>.json` from a local directory.
pub struct DirLoader {
    root: PathBuf,
}

impl DirLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Path of the document for a translation.
    pub fn document_path(&self, id: &TranslationId) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }
}

#[async_trait]
impl TranslationLoader for DirLoader {
    fn name(&self) -> &str {
        "dir"
    }

    async fn fetch(&self, id: &TranslationId) -> Result<TranslationData> {
        let path = self.document_path(id);
        debug!(path = %path.display(), "reading translation");

        let bytes = fs::read(&path)
            .await
            .map_err(|e| Error::load_failed(id.as_str(), format!("{}: {}", path.display(), e)))?;
        let data = TranslationData::parse(id, &bytes)?;

        info!(translation = %id, verses = data.verse_count(), "translation read");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(s: &str) -> TranslationId {
        TranslationId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_dir_loader_reads_document() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("kjv.json"),
            r#"{"data":{"John":{"3":[{"number":16,"text":"For God so loved the world"}]}}}"#,
        )
        .unwrap();

        let loader = DirLoader::new(temp.path());
        let data = loader.fetch(&id("kjv")).await.unwrap();
        assert_eq!(data.chapter("John", 3).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dir_loader_missing_is_load_failed() {
        let temp = TempDir::new().unwrap();
        let loader = DirLoader::new(temp.path());
        let err = loader.fetch(&id("web")).await.unwrap_err();
        assert!(matches!(err, Error::LoadFailed { translation, .. } if translation == "web"));
    }

    #[test]
    fn test_http_document_url() {
        let loader = HttpLoader::new(Url::parse("https://cdn.example.org/bibles").unwrap()).unwrap();
        assert_eq!(
            loader.document_url(&id("KJV")).unwrap().as_str(),
            "https://cdn.example.org/bibles/kjv.json"
        );
    }

    #[test]
    fn test_http_loader_rejects_non_base_url() {
        assert!(HttpLoader::new(Url::parse("mailto:someone@example.org").unwrap()).is_err());
    }
}
