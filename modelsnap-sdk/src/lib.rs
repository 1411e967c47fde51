//! # modelsnap-sdk
//!
//! HTTP client for a modelsnap cloud store.
//!
//! [`CloudClient`] implements [`RemoteStore`], so it plugs straight into a
//! [`Reconciler`](modelsnap_core::Reconciler).
//!
//! ## Example
//!
//! ```no_run
//! use modelsnap_core::{ProjectSession, Reconciler, StaticToken};
//! use modelsnap_sdk::CloudClient;
//!
//! # async fn run() -> modelsnap_core::Result<()> {
//! let client = CloudClient::new("http://localhost:3040", "bracket", StaticToken::new("secret"));
//! let reconciler = Reconciler::new(&client);
//!
//! let (mut session, _) = ProjectSession::open_tracked_file("models/bracket.3dm")?;
//! session.commit_working_file("Widened the flange")?;
//! session.push(&reconciler).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use modelsnap_core::remote::{
    RemoteObject, RemoteStore, TokenSupplier, TransferDirection, TransferRequest, TransferTarget,
};
use modelsnap_core::{Error, Result};
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct CloudClient {
    base_url: String,
    project: String,
    tokens: Arc<dyn TokenSupplier>,
    client: reqwest::Client,
}

impl CloudClient {
    /// Create a new cloud client
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the store (e.g., "http://localhost:3040")
    /// * `project` - Project the tracked file belongs to
    /// * `tokens` - Source of the session token sent with target requests
    pub fn new(
        base_url: impl Into<String>,
        project: impl Into<String>,
        tokens: impl TokenSupplier + 'static,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.into(),
            tokens: Arc::new(tokens),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Check server health
    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| Error::transport("health check", e))?;

        Ok(response.status().is_success())
    }

    /// Targets may come back relative to the store's base URL.
    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl RemoteStore for CloudClient {
    async fn issue_target(
        &self,
        direction: TransferDirection,
        object: &RemoteObject,
    ) -> Result<TransferTarget> {
        let token = self.tokens.token()?;
        let request = TransferRequest {
            direction,
            object: object.clone(),
        };

        let response = self
            .client
            .post(format!(
                "{}/projects/{}/transfers",
                self.base_url, self.project
            ))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::transport("request transfer target", e))?
            .error_for_status()
            .map_err(|e| status_error("request transfer target", e))?;

        let target: TransferTarget = response
            .json()
            .await
            .map_err(|e| Error::transport("decode transfer target", e))?;

        debug!(
            "Issued {} target for {}",
            direction.as_str(),
            object.key(&self.project)
        );
        Ok(TransferTarget {
            url: self.resolve(&target.url),
            expires_at: target.expires_at,
        })
    }

    async fn put_object(&self, target: &TransferTarget, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put(&target.url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::transport("upload", e))?
            .error_for_status()
            .map_err(|e| status_error("upload", e))?;
        Ok(())
    }

    async fn get_object(&self, target: &TransferTarget) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(&target.url)
            .send()
            .await
            .map_err(|e| Error::transport("download", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| status_error("download", e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transport("download", e))?;
        Ok(Some(bytes.to_vec()))
    }
}

/// A 4xx answer means the store refused the request itself; only timeouts
/// and rate limits among them are worth repeating.
fn status_error(context: &str, err: reqwest::Error) -> Error {
    match err.status() {
        Some(status)
            if status.is_client_error()
                && status != StatusCode::REQUEST_TIMEOUT
                && status != StatusCode::TOO_MANY_REQUESTS =>
        {
            Error::rejected(context, err)
        }
        _ => Error::transport(context, err),
    }
}
