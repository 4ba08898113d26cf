use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors raised while retrieving a section (or index) over HTTP.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to retrieve {url}: got status {status}")]
    Status { url: String, status: u16 },
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("fetch of {0} cancelled")]
    Cancelled(String),
}

/// Retrieves one section's raw bytes.
///
/// Implementations perform exactly one request per call: no retry, no range
/// requests. A non-success status is a [`FetchError::Status`].
#[async_trait]
pub trait SectionFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

#[async_trait]
impl<T: SectionFetcher + ?Sized> SectionFetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        (**self).fetch(url).await
    }
}

/// Addressing scheme for the numbered section blobs of one manifest:
/// `{base}/section{N}.dat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionUrl {
    base: String,
}

impl SectionUrl {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Derives the section base from an index URL by stripping its trailing
    /// `/index.xml` (or any other trailing `*.xml` component).
    pub fn from_index_url(index_url: &str) -> Self {
        match index_url.rsplit_once('/') {
            Some((base, last)) if last.ends_with(".xml") => Self::new(base),
            _ => Self::new(index_url),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// URL of section `id`.
    pub fn section(&self, id: u32) -> String {
        format!("{}/section{}.dat", self.base, id)
    }
}

/// [`SectionFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpSectionFetcher {
    client: Client,
}

impl HttpSectionFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client with the given user agent and per-request timeout.
    pub fn with_settings(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl SectionFetcher for HttpSectionFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        debug!(url, "fetching section");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let capacity = resp.content_length().unwrap_or(0) as usize;
        let mut buffer = BytesMut::with_capacity(capacity);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        debug!(url, len = buffer.len(), "section fetched");
        Ok(buffer.freeze())
    }
}

/// Wraps a fetcher so that every request is abandoned once the batch
/// token is cancelled, and no new request starts after that.
pub struct CancellableFetcher<F> {
    inner: F,
    token: CancellationToken,
}

impl<F> CancellableFetcher<F> {
    pub fn new(inner: F, token: CancellationToken) -> Self {
        Self { inner, token }
    }
}

#[async_trait]
impl<F: SectionFetcher> SectionFetcher for CancellableFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        if self.token.is_cancelled() {
            return Err(FetchError::Cancelled(url.to_string()));
        }
        tokio::select! {
            _ = self.token.cancelled() => Err(FetchError::Cancelled(url.to_string())),
            res = self.inner.fetch(url) => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_urls_substitute_the_id() {
        let url = SectionUrl::new("http://cdn.test/client/");
        assert_eq!(url.base(), "http://cdn.test/client");
        assert_eq!(url.section(0), "http://cdn.test/client/section0.dat");
        assert_eq!(url.section(17), "http://cdn.test/client/section17.dat");
    }

    #[test]
    fn base_is_derived_from_index_url() {
        let url = SectionUrl::from_index_url("http://cdn.test/1614b/client/Tracks/index.xml");
        assert_eq!(url.base(), "http://cdn.test/1614b/client/Tracks");

        let url = SectionUrl::from_index_url("http://cdn.test/1614b/client");
        assert_eq!(url.base(), "http://cdn.test/1614b/client");
    }

    struct Never;

    #[async_trait]
    impl SectionFetcher for Never {
        async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancelled_fetch_is_abandoned() {
        let token = CancellationToken::new();
        let fetcher = CancellableFetcher::new(Never, token.clone());
        let handle = tokio::spawn(async move { fetcher.fetch("http://cdn.test/section0.dat").await });
        token.cancel();
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(FetchError::Cancelled(_))));
    }
}
