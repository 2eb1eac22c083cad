// SPDX-License-Identifier: GPL-3.0-or-later
//! Resolves audio URLs straight from a site's metadata API, skipping the browser.

use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use tunefetch_config::{ProberConfig, SiteProfile};
use tunefetch_domain::{AudioCandidate, Provenance};

lazy_static! {
    static ref MEDIA_URL_PATTERN: Regex = Regex::new(
        r#"(?i)https?://[^\s"'<>\\]+?\.(?:mp4|m4a|aac|mp3)(?:\?[^\s"'<>\\]*)?"#
    )
    .expect("valid media url regex");
    static ref MEDIA_FIELD_PATTERN: Regex = Regex::new(
        r#""(?:media_url|download_url|stream_url|audio_url|url)"\s*:\s*"(https?://[^"]+)""#
    )
    .expect("valid media field regex");
}

/// JSON keys whose string values are taken as media links.
const MEDIA_KEYS: &[&str] = &[
    "media_url",
    "download_url",
    "stream_url",
    "audio_url",
    "media_preview_url",
    "vlink",
];

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("endpoint responded with status {status}")]
    HttpStatus { status: u16 },
}

/// Source of audio candidates that does not need a browser.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Never fails; an empty list means nothing was found.
    async fn probe(&self, page_url: &str, profile: &SiteProfile) -> Vec<AudioCandidate>;
}

fn unescape(body: &str) -> String {
    body.replace("\\/", "/")
        .replace("\\u0026", "&")
        .replace("&amp;", "&")
}

fn looks_like_media(url: &str) -> bool {
    MEDIA_URL_PATTERN.is_match(url)
}

fn push_unique(found: &mut Vec<String>, url: &str) {
    let url = url.trim();
    if !url.is_empty() && !found.iter().any(|existing| existing == url) {
        found.push(url.to_string());
    }
}

/// Media URLs embedded in arbitrary text (JSON, HTML, scripts), in order of appearance.
pub fn media_urls_in_text(text: &str) -> Vec<String> {
    let text = unescape(text);
    let mut found = Vec::new();
    for captures in MEDIA_FIELD_PATTERN.captures_iter(&text) {
        if let Some(url) = captures.get(1) {
            if looks_like_media(url.as_str()) {
                push_unique(&mut found, url.as_str());
            }
        }
    }
    for url in MEDIA_URL_PATTERN.find_iter(&text) {
        push_unique(&mut found, url.as_str());
    }
    found
}

fn walk(value: &Value, depth: usize, max_depth: usize, found: &mut Vec<String>) {
    if depth > max_depth {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if let Value::String(text) = child {
                    let text = unescape(text);
                    let keyed = MEDIA_KEYS.contains(&key.as_str());
                    if text.starts_with("http") && (keyed || looks_like_media(&text)) {
                        push_unique(found, &text);
                    }
                } else {
                    walk(child, depth + 1, max_depth, found);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, depth + 1, max_depth, found);
            }
        }
        Value::String(text) => {
            let text = unescape(text);
            if text.starts_with("http") && looks_like_media(&text) {
                push_unique(found, &text);
            }
        }
        _ => {}
    }
}

/// Media URLs from a metadata payload: a pattern scan of the raw body plus a
/// depth-bounded walk of the parsed JSON.
pub fn extract_media_urls(body: &str, max_depth: usize) -> Vec<String> {
    let mut found = media_urls_in_text(body);
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        walk(&value, 0, max_depth, &mut found);
    }
    found
}

/// Catalog identifier of a song page, per the site's identifier pattern.
pub fn song_identifier(page_url: &str, profile: &SiteProfile) -> Option<String> {
    let pattern = profile.identifier_pattern.as_deref()?;
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => {
            warn!(target: "prober", %pattern, error = %err, "invalid identifier pattern");
            return None;
        }
    };
    regex
        .captures(page_url)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
}

pub struct DirectApiProber {
    client: Client,
    timeout: Duration,
    max_depth: usize,
    quality_ladder: Vec<u32>,
}

impl DirectApiProber {
    pub fn new(client: Client, config: &ProberConfig, quality_ladder: Vec<u32>) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(config.request_timeout_secs),
            max_depth: config.max_depth,
            quality_ladder,
        }
    }

    async fn query_endpoint(&self, url: &str) -> Result<Vec<String>, ProbeError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::HttpStatus {
                status: status.as_u16(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        Ok(extract_media_urls(&body, self.max_depth))
    }

    async fn is_reachable(&self, url: &str) -> bool {
        match self.client.head(url).timeout(self.timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(target: "prober", %url, error = %err, "head request failed");
                false
            }
        }
    }

    /// Builds media URLs from CDN templates and keeps the reachable ones.
    async fn constructed(&self, id: &str, profile: &SiteProfile) -> Vec<String> {
        let mut found = Vec::new();
        for template in &profile.cdn_templates {
            for quality in &self.quality_ladder {
                let url = template
                    .replace("{id}", id)
                    .replace("{quality}", &quality.to_string());
                if self.is_reachable(&url).await {
                    push_unique(&mut found, &url);
                }
            }
        }
        found
    }
}

#[async_trait]
impl MediaProbe for DirectApiProber {
    async fn probe(&self, page_url: &str, profile: &SiteProfile) -> Vec<AudioCandidate> {
        let Some(id) = song_identifier(page_url, profile) else {
            debug!(target: "prober", %page_url, "no catalog identifier in url");
            return Vec::new();
        };
        let encoded = utf8_percent_encode(&id, NON_ALPHANUMERIC).to_string();

        for endpoint in &profile.api_endpoints {
            let url = endpoint.replace("{id}", &encoded);
            match self.query_endpoint(&url).await {
                Ok(urls) if !urls.is_empty() => {
                    info!(target: "prober", %id, count = urls.len(), "media urls from metadata api");
                    return urls
                        .into_iter()
                        .map(|url| AudioCandidate::new(url, Provenance::Api))
                        .collect();
                }
                Ok(_) => debug!(target: "prober", %url, "endpoint returned no media urls"),
                Err(err) => warn!(target: "prober", %url, error = %err, "metadata endpoint failed"),
            }
        }

        let constructed = self.constructed(&id, profile).await;
        if !constructed.is_empty() {
            info!(target: "prober", %id, count = constructed.len(), "constructed cdn urls are reachable");
        }
        constructed
            .into_iter()
            .map(|url| AudioCandidate::new(url, Provenance::Constructed))
            .collect()
    }
}
