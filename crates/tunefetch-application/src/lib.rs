// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use tunefetch_config::AppConfig;

pub mod classifier;
pub mod direct_api;
pub mod error;
pub mod fetcher;
pub mod filtering;
pub mod interaction;
pub mod jobs;
pub mod matching;
pub mod observer;
pub mod pipeline;
pub mod scoring;
pub mod search;
pub mod service;

#[cfg(test)]
mod test_support;

pub use classifier::{AudioClassifier, Verdict};
pub use direct_api::{DirectApiProber, MediaProbe};
pub use error::ResolveError;
pub use fetcher::Fetcher;
pub use jobs::{JobReporter, JobTracker};
pub use matching::ResultSetMatcher;
pub use pipeline::AudioResolutionPipeline;
pub use scoring::RelevanceScorer;
pub use service::DownloadService;

use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub downloads: Arc<DownloadService>,
}

impl AppState {
    pub fn new(config: AppConfig, downloads: Arc<DownloadService>) -> Self {
        Self { config, downloads }
    }

    pub fn jobs(&self) -> &JobTracker {
        self.downloads.tracker()
    }

    pub fn on_start(&self) {
        info!(
            target: "application",
            download_dir = %self.config.fetcher.download_dir.display(),
            store_files = self.config.fetcher.store_files,
            sites = self.config.sites.profiles.len(),
            "application state initialized"
        );
    }
}
