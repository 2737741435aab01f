//! Delivery of outbox entries to the sync server.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::outbox::{OutboxEntry, Operation};
use lectio_common::{Error, Result};

/// Sends one outbox entry to the server.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Deliver an entry.
    ///
    /// # Errors
    /// - `Transport` if the server did not accept the operation
    async fn deliver(&self, entry: &OutboxEntry) -> Result<()>;
}

/// REST transport: `PUT` creates and `DELETE` removes
/// `<endpoint>/<kind>s/<id>`.
pub struct HttpTransport {
    http: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpTransport {
    /// # Errors
    /// - Endpoint cannot be a base
    /// - HTTP client construction failure
    pub fn new(endpoint: Url) -> Result<Self> {
        if endpoint.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "Sync endpoint cannot be a base: {}",
                endpoint
            )));
        }

        let http = Client::builder()
            .user_agent(concat!("Lectio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            token: None,
        })
    }

    /// Send a bearer token with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Remote URL of the entity an entry refers to.
    pub fn entity_url(&self, entry: &OutboxEntry) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("Invalid sync endpoint: {}", self.endpoint)))?
            .pop_if_empty()
            .push(entry.kind.collection())
            .push(&entry.id);
        Ok(url)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<()> {
        let url = self.entity_url(entry)?;
        let request = match entry.operation {
            Operation::Create => self.http.put(url.clone()).json(&entry.payload),
            Operation::Delete => self.http.delete(url.clone()),
        };
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{:?} {} failed: {}", entry.operation, url, e)))?;

        let status = response.status();
        debug!(%url, operation = ?entry.operation, %status, "sync request answered");

        if status.is_success() {
            return Ok(());
        }
        // Already gone on the server.
        if entry.operation == Operation::Delete && status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Error::Transport(format!(
            "{:?} {} returned {}",
            entry.operation, url, status
        )))
    }
}
