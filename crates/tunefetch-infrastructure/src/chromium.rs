// SPDX-License-Identifier: GPL-3.0-or-later
//! Chromium over the DevTools protocol.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::{
    BrowserError, BrowserLauncher, BrowserSession, NetworkEvent, ScrollPosition, SessionOptions,
    NETWORK_EVENT_BUFFER,
};

const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-gpu",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-sync",
    "--no-first-run",
    "--mute-audio",
    "--autoplay-policy=no-user-gesture-required",
];

const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    window.chrome = { runtime: {} };
"#;

#[derive(Debug, Default, Clone)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(
        &self,
        options: &SessionOptions,
    ) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let session = ChromiumSession::launch(options).await?;
        Ok(Box::new(session))
    }
}

pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Page,
    tasks: Vec<JoinHandle<()>>,
    events: Option<mpsc::Receiver<NetworkEvent>>,
    navigation_timeout: Duration,
}

impl ChromiumSession {
    pub async fn launch(options: &SessionOptions) -> Result<Self, BrowserError> {
        let mut args: Vec<String> = LAUNCH_ARGS.iter().map(|arg| arg.to_string()).collect();
        args.push(format!("--user-agent={}", options.user_agent));

        let (width, height) = options.viewport;
        let mut builder = ChromeConfig::builder()
            .viewport(Some(Viewport {
                width,
                height,
                device_scale_factor: Some(1.0),
                ..Default::default()
            }))
            .request_timeout(options.navigation_timeout)
            .args(args);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.executable_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });
        info!(target: "browser", headless = options.headless, "browser launched");

        let (sender, receiver) = mpsc::channel(NETWORK_EVENT_BUFFER);
        let prepared = prepare_page(&browser, sender).await;
        let (page, mut tasks) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                return Err(err);
            }
        };
        tasks.push(handler_task);

        Ok(Self {
            browser: Some(browser),
            page,
            tasks,
            events: Some(receiver),
            navigation_timeout: options.navigation_timeout,
        })
    }
}

/// Opens a blank page with the stealth script and network forwarding in place.
async fn prepare_page(
    browser: &Browser,
    sender: mpsc::Sender<NetworkEvent>,
) -> Result<(Page, Vec<JoinHandle<()>>), BrowserError> {
    let page = browser.new_page("about:blank").await.map_err(command)?;

    if let Err(err) = page
        .execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
        .await
    {
        debug!(target: "browser", error = %err, "stealth script not installed");
    }
    page.execute(EnableParams::default()).await.map_err(command)?;

    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(command)?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(command)?;

    let request_sender = sender.clone();
    let request_task = tokio::spawn(async move {
        while let Some(event) = requests.next().await {
            let forwarded = NetworkEvent::Request {
                url: event.request.url.clone(),
                resource_type: event.r#type.as_ref().map(resource_type_name),
                headers: header_pairs(event.request.headers.inner()),
            };
            if request_sender.send(forwarded).await.is_err() {
                break;
            }
        }
    });

    let response_task = tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            let mut headers = header_pairs(event.response.headers.inner());
            if !headers.iter().any(|(k, _)| k == "content-type") {
                headers.push(("content-type".to_string(), event.response.mime_type.clone()));
            }
            let forwarded = NetworkEvent::Response {
                url: event.response.url.clone(),
                status: u16::try_from(event.response.status).unwrap_or(0),
                headers,
            };
            if sender.send(forwarded).await.is_err() {
                break;
            }
        }
    });

    Ok((page, vec![request_task, response_task]))
}

fn command(err: impl std::fmt::Display) -> BrowserError {
    BrowserError::Command(err.to_string())
}

fn resource_type_name(kind: &ResourceType) -> String {
    format!("{kind:?}").to_ascii_lowercase()
}

fn header_pairs(value: &serde_json::Value) -> Vec<(String, String)> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(key, value)| {
                    let value = value
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| value.to_string());
                    (key.to_ascii_lowercase(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        if self.browser.is_none() {
            return Err(BrowserError::Closed);
        }
        debug!(target: "browser", %url, "navigating");
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            }),
            Err(_) => Err(BrowserError::NavigationTimeout {
                url: url.to_string(),
                secs: self.navigation_timeout.as_secs(),
            }),
        }
    }

    async fn content(&mut self) -> Result<String, BrowserError> {
        self.page.content().await.map_err(command)
    }

    async fn click_first(&mut self, selector: &str) -> Result<bool, BrowserError> {
        let Ok(elements) = self.page.find_elements(selector).await else {
            return Ok(false);
        };
        for element in elements {
            // Invisible elements have no box to click and fail here.
            if element.click().await.is_ok() {
                debug!(target: "browser", %selector, "clicked element");
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn hover_first(&mut self, selector: &str) -> Result<bool, BrowserError> {
        let Ok(elements) = self.page.find_elements(selector).await else {
            return Ok(false);
        };
        for element in elements {
            if element.hover().await.is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn fill_and_submit(&mut self, selector: &str, text: &str) -> Result<bool, BrowserError> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        if element.click().await.is_err() {
            return Ok(false);
        }
        element.type_str(text).await.map_err(command)?;
        element.press_key("Enter").await.map_err(command)?;
        Ok(true)
    }

    async fn scroll_to(&mut self, position: ScrollPosition) -> Result<(), BrowserError> {
        self.page
            .evaluate(position.script())
            .await
            .map(|_| ())
            .map_err(command)
    }

    async fn reload(&mut self) -> Result<(), BrowserError> {
        match tokio::time::timeout(self.navigation_timeout, self.page.reload()).await {
            Ok(result) => result.map(|_| ()).map_err(command),
            Err(_) => Err(BrowserError::NavigationTimeout {
                url: "reload".to_string(),
                secs: self.navigation_timeout.as_secs(),
            }),
        }
    }

    async fn current_url(&mut self) -> Result<Option<String>, BrowserError> {
        self.page.url().await.map_err(command)
    }

    fn take_network_events(&mut self) -> Option<mpsc::Receiver<NetworkEvent>> {
        self.events.take()
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        let closed = browser.close().await;
        if let Err(err) = browser.wait().await {
            warn!(target: "browser", error = %err, "browser process did not exit cleanly");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!(target: "browser", "browser closed");
        closed.map(|_| ()).map_err(command)
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.browser.is_some() {
            // Dropping the browser kills the child process.
            warn!(target: "browser", "session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_pairs_lowercases_keys_and_stringifies_values() {
        let headers = header_pairs(&json!({
            "Content-Type": "audio/mp4",
            "Content-Length": 1234
        }));
        assert!(headers.contains(&("content-type".to_string(), "audio/mp4".to_string())));
        assert!(headers.contains(&("content-length".to_string(), "1234".to_string())));
        assert!(header_pairs(&json!(null)).is_empty());
    }

    #[test]
    fn resource_types_use_lowercase_names() {
        assert_eq!(resource_type_name(&ResourceType::Media), "media");
        assert_eq!(resource_type_name(&ResourceType::Xhr), "xhr");
    }
}
