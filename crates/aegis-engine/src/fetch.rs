//! Filter list fetching
//!
//! Remote lists come over HTTP(S). Built-in lists ship with the host and
//! are read from disk, either via `file://` or as a path relative to the
//! bundle directory.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip any intermediate HTTP cache.
    pub bypass_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub text: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ListFetcher: Send + Sync {
    async fn fetch(&self, source: &str, options: FetchOptions) -> Result<FetchResponse>;
}

// =============================================================================
// HTTP + local files
// =============================================================================

pub struct HttpFetcher {
    client: reqwest::Client,
    base_dir: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("aegis/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EngineError::fetch("http client", e))?;

        Ok(Self { client, base_dir: None })
    }

    /// Resolve relative local sources against `dir`.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn local_path(&self, source: &str) -> PathBuf {
        let path = PathBuf::from(source.strip_prefix("file://").unwrap_or(source));
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    async fn fetch_http(&self, source: &str, options: FetchOptions) -> Result<FetchResponse> {
        let mut request = self.client.get(source);
        if options.bypass_cache {
            request = request
                .header(reqwest::header::CACHE_CONTROL, "no-cache")
                .header(reqwest::header::PRAGMA, "no-cache");
        }

        let response = request.send().await.map_err(|e| EngineError::fetch(source, e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| EngineError::fetch(source, e))?;
        Ok(FetchResponse { status, text })
    }

    async fn fetch_local(&self, source: &str) -> Result<FetchResponse> {
        let path = self.local_path(source);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EngineError::fetch(source, format!("{}: {e}", path.display())))?;
        Ok(FetchResponse { status: 200, text })
    }
}

#[async_trait]
impl ListFetcher for HttpFetcher {
    async fn fetch(&self, source: &str, options: FetchOptions) -> Result<FetchResponse> {
        if source.starts_with("http://") || source.starts_with("https://") {
            self.fetch_http(source, options).await
        } else {
            self.fetch_local(source).await
        }
    }
}
