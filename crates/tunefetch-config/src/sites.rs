// SPDX-License-Identifier: GPL-3.0-or-later
//! Per-site selector and timing profiles, looked up by host.

use serde::{Deserialize, Serialize};
use url::Url;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Everything the automation layer needs to know about one music site.
///
/// Selector lists are ordered; the first selector that yields anything wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Host suffix this profile applies to, e.g. `jiosaavn.com`. Empty for the fallback.
    pub domain: String,
    pub base_url: Option<String>,
    /// Path of the page that hosts the search box.
    pub search_path: String,
    /// Direct search URL used when no search box is found. `{query}` is replaced
    /// with the percent-encoded query.
    pub search_url_template: Option<String>,
    pub search_input_selectors: Vec<String>,
    /// Groups of result-link selectors. The first group matching at least one
    /// element is used.
    pub result_link_selectors: Vec<String>,
    /// Substring of a song-page href, used for the generic link fallback.
    pub page_path_marker: String,
    pub container_selectors: Vec<String>,
    pub title_selectors: Vec<String>,
    pub artist_selectors: Vec<String>,
    pub play_selectors: Vec<String>,
    pub hover_selectors: Vec<String>,
    /// Host fragments of the site's media CDN.
    pub media_host_markers: Vec<String>,
    /// Regex with one capture group extracting the catalog identifier from a page URL.
    pub identifier_pattern: Option<String>,
    /// Metadata endpoints; `{id}` is replaced with the catalog identifier.
    pub api_endpoints: Vec<String>,
    /// Media URL templates with `{id}` and `{quality}` placeholders.
    pub cdn_templates: Vec<String>,
    pub requires_play_click: bool,
    pub results_wait_ms: u64,
    pub click_settle_ms: u64,
    pub scroll_settle_ms: u64,
    pub hover_settle_ms: u64,
    pub max_results: usize,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            domain: String::new(),
            base_url: None,
            search_path: "/".to_string(),
            search_url_template: None,
            search_input_selectors: strings(&[
                "input[type=\"search\"]",
                "input[role=\"combobox\"]",
                "input[aria-label=\"Search\"]",
                "input[placeholder*=\"search\" i]",
                "#search",
                ".search-input",
            ]),
            result_link_selectors: strings(&[
                "a[href*=\"/song/\"]",
                "a[href*=\"/track/\"]",
                "[data-type=\"song\"] a",
                ".song-item a",
                ".track-item a",
            ]),
            page_path_marker: "/song/".to_string(),
            container_selectors: strings(&[
                ".song-item",
                ".song-card",
                ".track-item",
                ".search-result",
                "[data-type=\"song\"]",
                "li",
            ]),
            title_selectors: strings(&[
                ".song-title",
                ".track-title",
                ".title",
                "h3",
                "h4",
                "[data-title]",
                ".name",
            ]),
            artist_selectors: strings(&[
                ".artist-name",
                ".artist",
                ".subtitle",
                ".singer",
                ".by-line",
            ]),
            play_selectors: strings(&[
                "[data-testid=\"play-button\"]",
                ".play-button",
                ".play-btn",
                "[aria-label*=\"play\" i]",
                "button[class*=\"play\"]",
            ]),
            hover_selectors: strings(&[".song", ".track", ".audio", ".player"]),
            media_host_markers: Vec::new(),
            identifier_pattern: None,
            api_endpoints: Vec::new(),
            cdn_templates: Vec::new(),
            requires_play_click: false,
            results_wait_ms: 3000,
            click_settle_ms: 3000,
            scroll_settle_ms: 2000,
            hover_settle_ms: 1000,
            max_results: 15,
        }
    }
}

impl SiteProfile {
    /// Tuned profile for jiosaavn.com.
    pub fn jiosaavn() -> Self {
        Self {
            domain: "jiosaavn.com".to_string(),
            base_url: Some("https://www.jiosaavn.com".to_string()),
            search_path: "/".to_string(),
            search_url_template: Some("https://www.jiosaavn.com/search/{query}".to_string()),
            search_input_selectors: strings(&[
                ".rbt-input-main.form-control.rbt-input",
                "input.rbt-input-main",
                "input[aria-label=\"Search\"]",
                "input[role=\"combobox\"]",
                "input[type=\"search\"]",
                "input[placeholder*=\"search\" i]",
                "#search",
                ".search-input",
            ]),
            result_link_selectors: strings(&[
                "a[href*=\"/song/\"]",
                "[data-type=\"song\"] a",
                ".song-item a",
                ".o-flag a",
            ]),
            page_path_marker: "/song/".to_string(),
            container_selectors: strings(&[
                ".o-flag",
                ".c-list-item",
                ".song-item",
                ".song-card",
                ".search-result",
                "[data-type=\"song\"]",
            ]),
            title_selectors: strings(&[
                ".song-name",
                ".c-media__title",
                ".o-flag__body h4",
                ".track-title",
                ".title",
                ".song-title",
                "h4",
                "h3",
                "h5",
                "[data-title]",
                ".c-label",
            ]),
            artist_selectors: strings(&[
                ".song-artists",
                ".o-description",
                ".c-subtitle",
                ".c-media__subtitle",
                ".o-flag__body p",
                ".artist-name",
                ".subtitle",
                ".artist",
                ".singer",
            ]),
            play_selectors: strings(&[
                ".c-btn.c-btn--primary[data-btn-icon=\"q\"]",
                ".c-btn--primary",
                "a.c-btn.c-btn--primary",
                "[data-testid=\"play-button\"]",
                ".player-controls .play-btn",
                ".playButton",
                "[aria-label*=\"play\" i]",
                ".play-button",
            ]),
            hover_selectors: strings(&[".song", ".track", ".audio", ".player", ".o-flag"]),
            media_host_markers: strings(&["saavncdn.com"]),
            identifier_pattern: Some(r"/song/[^/]+/([^/?#]+)".to_string()),
            api_endpoints: strings(&[
                "https://www.jiosaavn.com/api.php?__call=song.getDetails&cc=in&_marker=0%3F_marker%3D0&_format=json&pids={id}",
                "https://www.jiosaavn.com/api.php?__call=webapi.get&token={id}&type=song&includeMetaTags=0&ctx=web6dot0&api_version=4&_format=json&_marker=0",
            ]),
            cdn_templates: strings(&["https://aac.saavncdn.com/{id}_{quality}.mp4"]),
            requires_play_click: true,
            results_wait_ms: 5000,
            click_settle_ms: 5000,
            scroll_settle_ms: 2000,
            hover_settle_ms: 1000,
            max_results: 15,
        }
    }

    /// Whether `host` belongs to this profile's domain.
    pub fn matches_host(&self, host: &str) -> bool {
        if self.domain.is_empty() {
            return false;
        }
        let host = host.to_ascii_lowercase();
        let domain = self.domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    }

    /// Whether `url` points at this site's media CDN.
    pub fn is_media_host(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        self.media_host_markers
            .iter()
            .any(|marker| lower.contains(&marker.to_ascii_lowercase()))
    }
}

/// Immutable lookup of site profiles keyed by host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteCatalog {
    pub profiles: Vec<SiteProfile>,
    pub fallback: SiteProfile,
    /// Site used for name searches.
    pub default_search_site: String,
}

impl Default for SiteCatalog {
    fn default() -> Self {
        Self {
            profiles: vec![SiteProfile::jiosaavn()],
            fallback: SiteProfile::default(),
            default_search_site: "jiosaavn.com".to_string(),
        }
    }
}

impl SiteCatalog {
    /// Profile for the host of `url`, or the fallback for unknown hosts and bad URLs.
    pub fn profile_for(&self, url: &str) -> &SiteProfile {
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
            .and_then(|host| self.profiles.iter().find(|p| p.matches_host(&host)))
            .unwrap_or(&self.fallback)
    }

    /// Profile used to run name searches.
    pub fn search_profile(&self) -> &SiteProfile {
        self.profiles
            .iter()
            .find(|p| p.domain.eq_ignore_ascii_case(&self.default_search_site))
            .or_else(|| self.profiles.first())
            .unwrap_or(&self.fallback)
    }
}
