//! Remote audio download.

use crate::error::{CompanionError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

/// Downloads encoded audio for a remote resource.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes>;
}

/// `reqwest`-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Returns [`CompanionError::Fetch`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fluffel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CompanionError::Fetch(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AudioFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        tracing::debug!(%url, "downloading audio");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CompanionError::Fetch(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompanionError::Fetch(format!("{url} returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CompanionError::Fetch(format!("reading body: {e}")))?;
        tracing::debug!(%url, bytes = body.len(), "audio downloaded");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn returns_body_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/song.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3data".to_vec()))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/song.mp3", server.uri())).unwrap();
        let body = fetcher().fetch(&url).await.unwrap();
        assert_eq!(&body[..], b"ID3data");
    }

    #[tokio::test]
    async fn empty_body_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/empty.mp3", server.uri())).unwrap();
        assert!(fetcher().fetch(&url).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn http_error_status_is_a_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing.mp3", server.uri())).unwrap();
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(matches!(err, CompanionError::Fetch(msg) if msg.contains("404")));
    }
}
