//! Fetching image bytes from providers
//!
//! Each metadata provider may need its own request profile (headers, cookies,
//! user agent, proxy). Fetchers are registered per provider name in a
//! [`FetcherRegistry`]; [`HttpFetcher`] is the reqwest-backed implementation.

use crate::error::{CoverCropError, Result};
use crate::tracing_config::{events, spans};
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

/// Default cap on a single image body
pub const DEFAULT_MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

/// Source of raw image bytes
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch the body at `url`
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>>;
}

/// Request profile for one provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchProfile {
    pub user_agent: Option<String>,
    /// Extra request headers, e.g. `Referer`
    pub headers: BTreeMap<String, String>,
    /// Cookies sent with every request
    pub cookies: BTreeMap<String, String>,
    /// Proxy URL for all schemes
    pub proxy: Option<String>,
    /// Whole-request timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Bodies larger than this are rejected
    pub max_body_bytes: Option<u64>,
}

impl FetchProfile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_cookie<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_proxy<S: Into<String>>(mut self, proxy: S) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: u64) -> Self {
        self.max_body_bytes = Some(limit);
        self
    }

    /// Default headers sent with every request of this profile
    ///
    /// # Errors
    /// [`CoverCropError::InvalidConfig`] for header names or values HTTP cannot carry.
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(user_agent) = &self.user_agent {
            headers.insert(USER_AGENT, header_value("User-Agent", user_agent)?);
        }

        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                CoverCropError::invalid_config(format!("Invalid header name '{}': {}", name, e))
            })?;
            headers.insert(header_name, header_value(name, value)?);
        }

        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert(COOKIE, header_value("Cookie", &cookie)?);
        }

        Ok(headers)
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        CoverCropError::invalid_config(format!("Invalid value for header '{}': {}", name, e))
    })
}

/// HTTP fetcher built from a [`FetchProfile`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: u64,
}

impl HttpFetcher {
    /// Build a client for `profile`
    ///
    /// # Errors
    /// - Invalid headers or proxy URL
    /// - Failed to create HTTP client
    pub fn new(profile: &FetchProfile) -> Result<Self> {
        let mut builder = Client::builder().default_headers(profile.header_map()?);

        if let Some(timeout_ms) = profile.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(proxy) = &profile.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                CoverCropError::invalid_config(format!("Invalid proxy '{}': {}", proxy, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            CoverCropError::invalid_config(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            max_body_bytes: profile.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CoverCropError::fetch_error(url, e))?;

        if !response.status().is_success() {
            return Err(CoverCropError::fetch_error(
                url,
                format!("HTTP status {}", response.status()),
            ));
        }

        let total_size = response.content_length();
        if let Some(total) = total_size {
            if total > self.max_body_bytes {
                return Err(CoverCropError::fetch_error(
                    url,
                    format!("body of {} bytes exceeds limit of {}", total, self.max_body_bytes),
                ));
            }
        }

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let capacity = total_size.unwrap_or(0).min(self.max_body_bytes) as usize;
        let mut body = Vec::with_capacity(capacity);
        let mut buffer = vec![0; 8192]; // 8KB buffer

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| CoverCropError::fetch_error(url, e))?;

            if bytes_read == 0 {
                break; // EOF
            }

            body.extend_from_slice(buffer.get(..bytes_read).unwrap_or(&[]));
            if body.len() as u64 > self.max_body_bytes {
                return Err(CoverCropError::fetch_error(
                    url,
                    format!("body exceeds limit of {} bytes", self.max_body_bytes),
                ));
            }
            events::fetch_progress(url, body.len() as u64, total_size);
        }

        debug!(url = %url, bytes = body.len(), "Fetched image");
        Ok(body)
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let download = self.download(url).instrument(spans::fetch(url));
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoverCropError::cancelled(format!("fetch of '{}'", url))),
            result = download => result,
        }
    }
}

/// Fetchers keyed by provider name (case-insensitive)
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<String, Arc<dyn ImageFetcher>>,
    fallback: Option<Arc<dyn ImageFetcher>>,
}

impl FetcherRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fetcher` for `provider`, replacing any previous one
    #[must_use]
    pub fn with_provider<S: AsRef<str>>(mut self, provider: S, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.register(provider, fetcher);
        self
    }

    /// Fetcher used for providers without their own registration
    #[must_use]
    pub fn with_fallback(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.fallback = Some(fetcher);
        self
    }

    pub fn register<S: AsRef<str>>(&mut self, provider: S, fetcher: Arc<dyn ImageFetcher>) {
        self.fetchers
            .insert(provider.as_ref().to_ascii_lowercase(), fetcher);
    }

    /// Look up the fetcher for `provider`
    ///
    /// # Errors
    /// [`CoverCropError::ProviderNotFound`] when neither a registration nor a fallback exists.
    pub fn get(&self, provider: &str) -> Result<Arc<dyn ImageFetcher>> {
        self.fetchers
            .get(&provider.to_ascii_lowercase())
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| CoverCropError::ProviderNotFound(provider.to_string()))
    }

    /// Registered provider names, sorted
    #[must_use]
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fetchers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherRegistry")
            .field("providers", &self.providers())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
