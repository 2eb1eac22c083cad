// SPDX-License-Identifier: GPL-3.0-or-later
//! Media download with retry and size validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, REFERER};
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use tunefetch_config::FetcherConfig;
use tunefetch_domain::{quality_marker, ExtractionResult, StoredFile};

use crate::error::ResolveError;

const DEFAULT_EXTENSION: &str = "mp3";
const KNOWN_EXTENSIONS: &[&str] = &["mp3", "mp4", "m4a", "aac", "ogg", "opus", "flac", "wav", "webm", "wma"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("server responded with status {status}")]
    HttpStatus { status: u16 },
    #[error("payload of {bytes} bytes is below the {min} byte minimum")]
    TooSmall { bytes: u64, min: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// File extension of a media URL, defaulting to mp3.
pub fn extension_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.')
        .and_then(|(_, ext)| {
            KNOWN_EXTENSIONS
                .iter()
                .find(|known| known.eq_ignore_ascii_case(ext))
                .copied()
        })
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Higher-quality siblings of `url`, best first, built by swapping its
/// quality marker for each larger value of `ladder`.
pub fn quality_variants(url: &str, ladder: &[u32]) -> Vec<String> {
    let Some(current) = quality_marker(url) else {
        return Vec::new();
    };
    let marker = format!("_{current}.");
    // The marker belongs to the file name; the query string is left alone.
    let path_end = url.find(['?', '#']).unwrap_or(url.len());
    let Some(position) = url[..path_end].rfind(&marker) else {
        return Vec::new();
    };

    let mut better: Vec<u32> = ladder.iter().copied().filter(|q| *q > current).collect();
    better.sort_unstable_by(|a, b| b.cmp(a));
    better.dedup();
    better
        .into_iter()
        .map(|quality| {
            format!(
                "{}_{quality}.{}",
                &url[..position],
                &url[position + marker.len()..]
            )
        })
        .collect()
}

pub struct Fetcher {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
    min_bytes: u64,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(client: Client, config: &FetcherConfig) -> Self {
        Self {
            client,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            min_bytes: config.min_file_bytes,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Downloads `url` to `destination`, retrying with a fixed delay. Partial
    /// or undersized files are removed after each failed attempt.
    pub async fn download(
        &self,
        url: &str,
        destination: &Path,
        referer: Option<&str>,
    ) -> Result<StoredFile, ResolveError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            match self.attempt(url, destination, referer).await {
                Ok(byte_size) => {
                    info!(target: "fetcher", %url, path = %destination.display(), byte_size, attempt, "download complete");
                    return Ok(StoredFile {
                        path: destination.to_path_buf(),
                        byte_size,
                    });
                }
                Err(err) => {
                    warn!(target: "fetcher", %url, attempt, max_attempts = self.max_retries, error = %err, "download attempt failed");
                    remove_partial(destination).await;
                    last_error = err.to_string();
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(ResolveError::FetchFailed {
            url: url.to_string(),
            attempts: self.max_retries,
            reason: last_error,
        })
    }

    async fn attempt(&self, url: &str, destination: &Path, referer: Option<&str>) -> Result<u64, FetchError> {
        let mut request = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header(ACCEPT, "audio/*,*/*;q=0.1")
            .header(ACCEPT_ENCODING, "identity");
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
            });
        }

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::File::create(destination).await?;
        let mut written: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| FetchError::Request(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written <= self.min_bytes {
            return Err(FetchError::TooSmall {
                bytes: written,
                min: self.min_bytes,
            });
        }
        Ok(written)
    }

    /// HEAD probe used for opportunistic quality upgrades.
    pub async fn is_reachable(&self, url: &str, referer: Option<&str>) -> bool {
        let mut request = self.client.head(url).timeout(self.timeout);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }
        matches!(request.send().await, Ok(response) if response.status().is_success())
    }

    /// Downloads the best available stream of `result` into `directory`
    /// under `stem`. Reachable higher-quality variants of the best observed
    /// URL go first, then every observed URL in order.
    pub async fn download_best(
        &self,
        result: &ExtractionResult,
        directory: &Path,
        stem: &str,
        quality_ladder: &[u32],
    ) -> Result<(StoredFile, String), ResolveError> {
        let referer = Some(result.source_page_url.as_str());
        let mut queue: Vec<String> = Vec::new();

        if let Some(best) = result.best_quality() {
            for variant in quality_variants(&best.url, quality_ladder) {
                if self.is_reachable(&variant, referer).await {
                    debug!(target: "fetcher", url = %variant, "higher quality variant available");
                    queue.push(variant);
                }
            }
        }
        for candidate in &result.audio_urls {
            if !queue.contains(&candidate.url) {
                queue.push(candidate.url.clone());
            }
        }

        let mut attempts = 0;
        let mut last_error = None;
        for url in &queue {
            let destination: PathBuf = directory.join(format!("{stem}.{}", extension_for(url)));
            match self.download(url, &destination, referer).await {
                Ok(file) => return Ok((file, url.clone())),
                Err(ResolveError::FetchFailed { attempts: used, reason, .. }) => {
                    attempts += used;
                    last_error = Some(reason);
                }
                Err(other) => return Err(other),
            }
        }

        Err(ResolveError::FetchFailed {
            url: queue.first().cloned().unwrap_or_default(),
            attempts,
            reason: last_error.unwrap_or_else(|| "no audio urls to download".to_string()),
        })
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(target: "fetcher", path = %path.display(), "removed partial file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(target: "fetcher", path = %path.display(), error = %err, "could not remove partial file"),
    }
}
