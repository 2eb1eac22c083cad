// SPDX-License-Identifier: GPL-3.0-or-later
//! Browser automation capability consumed by the application layer.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tunefetch_config::BrowserConfig;

/// Capacity of the per-session network event channel.
pub const NETWORK_EVENT_BUFFER: usize = 512;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("navigation to {url} timed out after {secs}s")]
    NavigationTimeout { url: String, secs: u64 },
    #[error("browser command failed: {0}")]
    Command(String),
    #[error("browser session already closed")]
    Closed,
}

/// Network traffic observed by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Request {
        url: String,
        resource_type: Option<String>,
        headers: Vec<(String, String)>,
    },
    Response {
        url: String,
        status: u16,
        headers: Vec<(String, String)>,
    },
}

impl NetworkEvent {
    pub fn url(&self) -> &str {
        match self {
            NetworkEvent::Request { url, .. } | NetworkEvent::Response { url, .. } => url,
        }
    }

    fn headers(&self) -> &[(String, String)] {
        match self {
            NetworkEvent::Request { headers, .. } | NetworkEvent::Response { headers, .. } => {
                headers
            }
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn resource_type(&self) -> Option<&str> {
        match self {
            NetworkEvent::Request { resource_type, .. } => resource_type.as_deref(),
            NetworkEvent::Response { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPosition {
    Top,
    Middle,
    Bottom,
}

impl ScrollPosition {
    pub fn script(self) -> &'static str {
        match self {
            ScrollPosition::Top => "window.scrollTo(0, 0)",
            ScrollPosition::Middle => "window.scrollTo(0, document.body.scrollHeight / 2)",
            ScrollPosition::Bottom => "window.scrollTo(0, document.body.scrollHeight)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    pub executable_path: Option<PathBuf>,
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub navigation_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            headless: config.headless,
            executable_path: config.executable_path.clone(),
            user_agent: config.user_agent.clone(),
            viewport: (config.viewport_width, config.viewport_height),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        }
    }
}

/// One isolated browser page plus the process behind it.
///
/// Element operations return `Ok(false)` when nothing matched; errors are
/// reserved for a broken session.
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Serialized DOM of the current page.
    async fn content(&mut self) -> Result<String, BrowserError>;

    /// Clicks the first visible element matching `selector`.
    async fn click_first(&mut self, selector: &str) -> Result<bool, BrowserError>;

    async fn hover_first(&mut self, selector: &str) -> Result<bool, BrowserError>;

    /// Types `text` into the first element matching `selector` and presses Enter.
    async fn fill_and_submit(&mut self, selector: &str, text: &str) -> Result<bool, BrowserError>;

    async fn scroll_to(&mut self, position: ScrollPosition) -> Result<(), BrowserError>;

    async fn reload(&mut self) -> Result<(), BrowserError>;

    async fn current_url(&mut self) -> Result<Option<String>, BrowserError>;

    /// Hands out the network event stream. Returns `None` after the first call.
    fn take_network_events(&mut self) -> Option<mpsc::Receiver<NetworkEvent>>;

    /// Releases the page and the browser process. Safe to call twice.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &SessionOptions)
        -> Result<Box<dyn BrowserSession>, BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let event = NetworkEvent::Response {
            url: "https://cdn.example.org/a.mp3".to_string(),
            status: 200,
            headers: vec![("Content-Type".to_string(), "audio/mpeg".to_string())],
        };
        assert_eq!(event.content_type(), Some("audio/mpeg"));
        assert_eq!(event.resource_type(), None);
    }

    #[test]
    fn options_follow_config() {
        let config = BrowserConfig {
            headless: false,
            navigation_timeout_secs: 7,
            ..BrowserConfig::default()
        };
        let options = SessionOptions::from_config(&config);
        assert!(!options.headless);
        assert_eq!(options.navigation_timeout, Duration::from_secs(7));
        assert_eq!(options.viewport, (1366, 768));
    }
}
