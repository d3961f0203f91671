//! HTTP transport

use reqwest::header::{CACHE_CONTROL, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;

use futures::StreamExt;

use crate::config::FetchConfig;
use crate::error::{ClientError, ClientResult, FetchError, FetchResult};

/// Upper bound on the buffer reserved from a Content-Length header
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// HTTP client configured for bundle downloads
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    enable_cache: bool,
}

impl HttpClient {
    /// Create a client from fetcher configuration
    ///
    /// Per-attempt timeouts are enforced by the caller, so the client itself
    /// only bounds connection setup.
    pub fn new(config: &FetchConfig) -> ClientResult<Self> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(10))
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(60))
            .use_rustls_tls()
            .gzip(true)
            .deflate(true)
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(ClientError::Client)?;

        Ok(Self {
            client,
            enable_cache: config.enable_cache,
        })
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// GET `url` into memory, reporting `(downloaded, total)` after each chunk
    ///
    /// `total` is the Content-Length, or 0 when the server does not send one.
    pub async fn get_with_progress(
        &self,
        url: &str,
        progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
    ) -> FetchResult<Vec<u8>> {
        let mut request = self.client.get(url);
        if !self.enable_cache {
            request = request.header(CACHE_CONTROL, "no-cache");
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status));
        }

        let total_size = response.content_length().unwrap_or(0);
        let mut downloaded = 0u64;
        let mut data = Vec::with_capacity(total_size.min(MAX_PREALLOCATION) as usize);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            data.extend_from_slice(&chunk);
            downloaded += chunk.len() as u64;
            if let Some(progress) = progress {
                progress(downloaded, total_size);
            }
        }

        Ok(data)
    }
}
