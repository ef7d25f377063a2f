//! Release Fetcher
//! Retrieves "latest release" metadata and payloads with cache fallback.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use super::config::ReleaseConfig;

const CLIENT_IDENT: &str = concat!("sitekeeper-updater/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Upstream rate limit hit (HTTP {0})")]
    RateLimited(u16),
    #[error("Invalid release response: {0}")]
    InvalidResponse(String),
    #[error("No release available: upstream unreachable and no cached descriptor")]
    Unavailable,
    #[error("Download checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<reqwest::Error> for ReleaseError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Everything the update flow needs to know about the newest release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseDescriptor {
    pub tag: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
    pub download_url: String,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

/// GitHub-style latest-release document.
#[derive(Debug, Deserialize)]
struct LatestReleaseResponse {
    tag_name: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    browser_download_url: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    digest: Option<String>,
}

impl LatestReleaseResponse {
    fn into_descriptor(self) -> Result<ReleaseDescriptor, ReleaseError> {
        let asset = self
            .assets
            .into_iter()
            .next()
            .ok_or_else(|| ReleaseError::InvalidResponse("release has no assets".to_string()))?;
        let sha256 = asset
            .digest
            .as_deref()
            .and_then(|d| d.strip_prefix("sha256:"))
            .map(|d| d.to_lowercase());
        Ok(ReleaseDescriptor {
            tag: self.tag_name,
            published_at: self.published_at,
            body: self.body.unwrap_or_default(),
            download_url: asset.browser_download_url,
            size: asset.size,
            sha256,
        })
    }
}

struct CacheEntry {
    descriptor: ReleaseDescriptor,
    fetched_at: Instant,
}

/// One cached descriptor serving two freshness windows: within the short
/// TTL it answers without a network call, within the long TTL it is the
/// degraded fallback when upstream throttles or drops.
pub struct ReleaseCache {
    entry: Mutex<Option<CacheEntry>>,
    fresh_ttl: Duration,
    fallback_ttl: Duration,
}

impl ReleaseCache {
    pub fn new(fresh_ttl: Duration, fallback_ttl: Duration) -> Self {
        Self {
            entry: Mutex::new(None),
            fresh_ttl,
            fallback_ttl,
        }
    }

    fn fresh(&self) -> Option<ReleaseDescriptor> {
        let guard = self.entry.lock().unwrap();
        guard
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < self.fresh_ttl)
            .map(|e| e.descriptor.clone())
    }

    fn fallback(&self) -> Option<ReleaseDescriptor> {
        let guard = self.entry.lock().unwrap();
        guard
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < self.fallback_ttl)
            .map(|e| e.descriptor.clone())
    }

    fn store(&self, descriptor: ReleaseDescriptor) {
        let mut guard = self.entry.lock().unwrap();
        *guard = Some(CacheEntry {
            descriptor,
            fetched_at: Instant::now(),
        });
    }
}

/// Cache-first lookup: fresh hit short-circuits, a miss fetches and
/// stores, a failed fetch falls back to the long-TTL entry and only then
/// surfaces `Unavailable`.
pub(crate) async fn latest_via<F, Fut>(
    cache: &ReleaseCache,
    fetch: F,
) -> Result<ReleaseDescriptor, ReleaseError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<ReleaseDescriptor, ReleaseError>>,
{
    if let Some(descriptor) = cache.fresh() {
        return Ok(descriptor);
    }

    match fetch().await {
        Ok(descriptor) => {
            cache.store(descriptor.clone());
            Ok(descriptor)
        }
        Err(e) => {
            if let Some(descriptor) = cache.fallback() {
                warn!(error = %e, "release fetch failed, serving stale descriptor");
                Ok(descriptor)
            } else {
                match e {
                    ReleaseError::Network(_) | ReleaseError::RateLimited(_) => {
                        Err(ReleaseError::Unavailable)
                    }
                    other => Err(other),
                }
            }
        }
    }
}

pub struct ReleaseFetcher {
    client: reqwest::Client,
    endpoint: String,
    cache: ReleaseCache,
    metadata_timeout: Duration,
    download_timeout: Duration,
}

impl ReleaseFetcher {
    pub fn new(config: &ReleaseConfig) -> Result<Self, ReleaseError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            cache: ReleaseCache::new(
                Duration::from_secs(config.fresh_ttl_secs),
                Duration::from_secs(config.fallback_ttl_secs),
            ),
            metadata_timeout: Duration::from_secs(config.metadata_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        })
    }

    /// Latest release descriptor, cache-first with stale fallback.
    pub async fn latest(&self) -> Result<ReleaseDescriptor, ReleaseError> {
        latest_via(&self.cache, || self.fetch_latest()).await
    }

    async fn fetch_latest(&self) -> Result<ReleaseDescriptor, ReleaseError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(USER_AGENT, CLIENT_IDENT)
            .header(ACCEPT, "application/vnd.github+json")
            .timeout(self.metadata_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ReleaseError::RateLimited(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ReleaseError::Network(format!("HTTP {}", status)));
        }

        let release: LatestReleaseResponse = response
            .json()
            .await
            .map_err(|e| ReleaseError::InvalidResponse(e.to_string()))?;
        let descriptor = release.into_descriptor()?;
        info!(tag = %descriptor.tag, "fetched latest release");
        Ok(descriptor)
    }

    /// Stream the release payload to `dest` under the download timeout.
    /// Written through a `.partial` file and renamed once complete; a
    /// checksum-carrying descriptor is verified before the rename.
    pub async fn download(
        &self,
        descriptor: &ReleaseDescriptor,
        dest: &Path,
    ) -> Result<u64, ReleaseError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = dest.with_extension("partial");

        let result = self.download_partial(descriptor, &partial).await;
        match result {
            Ok(bytes) => {
                fs::rename(&partial, dest)?;
                Ok(bytes)
            }
            Err(e) => {
                fs::remove_file(&partial).ok();
                Err(e)
            }
        }
    }

    async fn download_partial(
        &self,
        descriptor: &ReleaseDescriptor,
        partial: &Path,
    ) -> Result<u64, ReleaseError> {
        let response = self
            .client
            .get(&descriptor.download_url)
            .header(USER_AGENT, CLIENT_IDENT)
            .timeout(self.download_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ReleaseError::RateLimited(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ReleaseError::Network(format!("HTTP {}", status)));
        }

        let mut file = File::create(partial)?;
        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ReleaseError::Network(e.to_string()))?;
            file.write_all(&chunk)?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }
        file.flush()?;
        drop(file);

        if let Some(expected) = &descriptor.sha256 {
            let actual = hex::encode(hasher.finalize());
            if &actual != expected {
                return Err(ReleaseError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(downloaded)
    }
}
