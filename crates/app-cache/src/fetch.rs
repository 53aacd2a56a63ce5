use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::errors::FetchError;

/// Port to the remote hosting applications.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Response headers of a HEAD request.
    async fn head(&self, url: &str) -> Result<HeaderMap, FetchError>;

    /// Size advertised by the remote for `url`, without reading the body.
    async fn content_length(&self, url: &str) -> Result<u64, FetchError>;

    /// Streams the body of `url` into `target`. Returns the number of bytes written.
    async fn download(&self, url: &str, target: &Path) -> Result<u64, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
    head_timeout: Duration,
    download_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(head_timeout: Duration, download_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            head_timeout,
            download_timeout,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    async fn stream_to(&self, url: &str, target: &Path) -> Result<u64, FetchError> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000), Duration::from_millis(120_000))
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn head(&self, url: &str) -> Result<HeaderMap, FetchError> {
        let response = self
            .client
            .head(url)
            .timeout(self.head_timeout)
            .send()
            .await?
            .error_for_status()?;
        debug!(url, status = response.status().as_u16(), "app HEAD probe");
        Ok(response.headers().clone())
    }

    async fn content_length(&self, url: &str) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(self.head_timeout)
            .send()
            .await?
            .error_for_status()?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .ok_or(FetchError::MissingLength)
    }

    async fn download(&self, url: &str, target: &Path) -> Result<u64, FetchError> {
        let started = std::time::Instant::now();
        let budget_ms = self.download_timeout.as_millis() as u64;
        let outcome = match tokio::time::timeout(self.download_timeout, self.stream_to(url, target)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(budget_ms)),
        };
        match outcome {
            Ok(bytes) => {
                info!(
                    url,
                    target = %target.display(),
                    bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "downloaded application"
                );
                Ok(bytes)
            }
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(target).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(target = %target.display(), %cleanup, "unable to remove partial download");
                    }
                }
                Err(err)
            }
        }
    }
}
