// SPDX-License-Identifier: GPL-3.0-or-later
pub mod browser;
pub mod chromium;

pub use browser::{
    BrowserError, BrowserLauncher, BrowserSession, NetworkEvent, ScrollPosition, SessionOptions,
};
pub use chromium::{ChromiumLauncher, ChromiumSession};

use anyhow::Result;
use reqwest::Client;
use tunefetch_config::AppConfig;

/// Shared HTTP client for metadata probes and media downloads.
pub fn http_client(config: &AppConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(config.browser.user_agent.clone())
        .cookie_store(true)
        .pool_max_idle_per_host(8)
        .build()?;
    Ok(client)
}
