//! Content fetcher trait and the reqwest-backed implementation

use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Transport-level failures. Every variant counts as a failed fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl FetchError {
    pub fn request(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Fetch raw bytes for a URL.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult<Bytes>;
}

#[derive(Clone, Debug)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::request(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::request(url, e.to_string()))?;
        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }
}
