// SPDX-License-Identifier: GPL-3.0-or-later
//! Audio resolution: the strategy ladder that turns a song page into audio URLs.
//!
//! Strategies run in order and each one only when the previous produced
//! nothing usable:
//! 1. direct API probing (no browser),
//! 2. browser automation with the interaction driver,
//! 3. aggressive capture of all traffic in a fresh session.
//!
//! Every browser session is bounded by the configured lifetime and is closed
//! on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunefetch_config::{AppConfig, PipelineConfig, SiteCatalog, SiteProfile};
use tunefetch_domain::{
    AudioCandidate, ExtractionResult, Provenance, ResolutionStrategy, ScoredCandidate, SearchQuery,
};
use tunefetch_infrastructure::{BrowserError, BrowserLauncher, BrowserSession, SessionOptions};

use crate::classifier::AudioClassifier;
use crate::direct_api::{media_urls_in_text, MediaProbe};
use crate::error::ResolveError;
use crate::filtering::filter_candidates;
use crate::interaction::InteractionDriver;
use crate::matching::ResultSetMatcher;
use crate::observer::{CaptureMode, NetworkObserver};
use crate::search::SearchNavigator;

const CACHE_CAPACITY: u64 = 512;

fn stage_name(strategy: ResolutionStrategy) -> &'static str {
    match strategy {
        ResolutionStrategy::DirectApi => "direct-api",
        ResolutionStrategy::BrowserAutomation => "browser-automation",
        ResolutionStrategy::AggressiveCapture => "aggressive-capture",
    }
}

pub struct AudioResolutionPipeline {
    launcher: Arc<dyn BrowserLauncher>,
    prober: Arc<dyn MediaProbe>,
    sites: SiteCatalog,
    matcher: ResultSetMatcher,
    options: SessionOptions,
    timing: PipelineConfig,
    settle_multiplier: f64,
    session_lifetime: Duration,
    cache: Cache<String, ExtractionResult>,
}

impl AudioResolutionPipeline {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, prober: Arc<dyn MediaProbe>, config: &AppConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(config.pipeline.resolution_cache_ttl_secs.max(1)))
            .build();
        Self {
            launcher,
            prober,
            sites: config.sites.clone(),
            matcher: ResultSetMatcher::new(&config.matching),
            options: SessionOptions::from_config(&config.browser),
            timing: config.pipeline.clone(),
            settle_multiplier: config.browser.settle_multiplier.max(0.0),
            session_lifetime: Duration::from_secs(config.browser.session_lifetime_secs),
            cache,
        }
    }

    pub fn sites(&self) -> &SiteCatalog {
        &self.sites
    }

    pub fn quality_ladder(&self) -> &[u32] {
        &self.timing.quality_ladder
    }

    fn scaled(&self, millis: u64) -> Duration {
        Duration::from_secs_f64(millis as f64 * self.settle_multiplier / 1000.0)
    }

    /// Waits a scaled delay while the observer keeps draining the session's
    /// traffic.
    async fn settle(
        &self,
        observer: &mut NetworkObserver,
        millis: u64,
        cancel: &CancellationToken,
    ) -> Result<(), ResolveError> {
        tokio::select! {
            _ = observer.watch(self.scaled(millis)) => Ok(()),
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
        }
    }

    async fn open_session(&self, stage: &'static str) -> Result<Box<dyn BrowserSession>, ResolveError> {
        let session = self.launcher.launch(&self.options).await?;
        debug!(target: "pipeline", stage, "browser session opened");
        Ok(session)
    }

    async fn close_session(&self, stage: &'static str, mut session: Box<dyn BrowserSession>) {
        if let Err(err) = session.close().await {
            warn!(target: "pipeline", stage, error = %err, "failed to close browser session");
        }
        debug!(target: "pipeline", stage, "browser session closed");
    }

    /// Runs session work under the hard session lifetime and the shutdown token.
    async fn bounded<T>(
        &self,
        stage: &'static str,
        cancel: &CancellationToken,
        work: impl Future<Output = Result<T, ResolveError>>,
    ) -> Result<T, ResolveError> {
        tokio::select! {
            result = tokio::time::timeout(self.session_lifetime, work) => match result {
                Ok(result) => result,
                Err(_) => {
                    warn!(target: "pipeline", stage, limit = ?self.session_lifetime, "session lifetime exceeded");
                    Err(ResolveError::SessionTimeout {
                        stage,
                        limit: self.session_lifetime,
                    })
                }
            },
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
        }
    }

    /// Searches the configured search site for `query` and returns the chosen song page.
    pub async fn locate(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<ScoredCandidate, ResolveError> {
        let navigator = SearchNavigator::new(
            self.sites.search_profile().clone(),
            self.matcher.clone(),
            self.settle_multiplier,
        );
        let mut session = self.open_session("search").await?;
        let outcome = self
            .bounded("search", cancel, navigator.locate(session.as_mut(), query))
            .await;
        self.close_session("search", session).await;
        outcome
    }

    /// Resolves audio URLs for a song page, using the cache when possible.
    pub async fn resolve(
        &self,
        source_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ResolveError> {
        if let Some(cached) = self.cache.get(source_url) {
            debug!(target: "pipeline", url = %source_url, "resolution cache hit");
            return Ok(cached);
        }
        let result = self.run_ladder(source_url, cancel).await?;
        self.cache.insert(source_url.to_string(), result.clone());
        Ok(result)
    }

    /// Drops any cached result for `source_url` and resolves it again.
    pub async fn refresh(
        &self,
        source_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ResolveError> {
        self.cache.invalidate(source_url);
        self.resolve(source_url, cancel).await
    }

    async fn run_ladder(
        &self,
        source_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ResolveError> {
        let profile = self.sites.profile_for(source_url).clone();
        let mut attempted = 0;

        for strategy in [
            ResolutionStrategy::DirectApi,
            ResolutionStrategy::BrowserAutomation,
            ResolutionStrategy::AggressiveCapture,
        ] {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            attempted += 1;
            info!(target: "pipeline", url = %source_url, %strategy, "attempting strategy");

            let raw = match self.run_strategy(strategy, source_url, &profile, cancel).await {
                Ok(raw) => raw,
                Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
                Err(err) => {
                    warn!(target: "pipeline", url = %source_url, %strategy, error = %err, "strategy failed");
                    continue;
                }
            };

            let observed = raw.len();
            let audio_urls = filter_candidates(raw, &profile);
            if audio_urls.is_empty() {
                warn!(target: "pipeline", url = %source_url, %strategy, observed, "strategy produced no usable audio");
                continue;
            }

            info!(
                target: "pipeline",
                url = %source_url,
                %strategy,
                count = audio_urls.len(),
                "audio resolved"
            );
            return Ok(ExtractionResult {
                audio_urls,
                source_page_url: source_url.to_string(),
                strategy,
            });
        }

        Err(ResolveError::NoAudioDetected {
            strategies_attempted: attempted,
        })
    }

    async fn run_strategy(
        &self,
        strategy: ResolutionStrategy,
        source_url: &str,
        profile: &SiteProfile,
        cancel: &CancellationToken,
    ) -> Result<Vec<AudioCandidate>, ResolveError> {
        match strategy {
            ResolutionStrategy::DirectApi => Ok(self.prober.probe(source_url, profile).await),
            ResolutionStrategy::BrowserAutomation | ResolutionStrategy::AggressiveCapture => {
                let stage = stage_name(strategy);
                let mut session = self.open_session(stage).await?;
                let outcome = if strategy == ResolutionStrategy::AggressiveCapture {
                    self.bounded(stage, cancel, self.capture_all(session.as_mut(), source_url, profile, cancel))
                        .await
                } else {
                    self.bounded(stage, cancel, self.interact(session.as_mut(), source_url, profile, cancel))
                        .await
                };
                self.close_session(stage, session).await;
                outcome
            }
        }
    }

    fn observe(
        session: &mut dyn BrowserSession,
        profile: &SiteProfile,
        mode: CaptureMode,
    ) -> Result<NetworkObserver, ResolveError> {
        NetworkObserver::attach(session, AudioClassifier::for_profile(profile), mode).ok_or_else(|| {
            ResolveError::Browser(BrowserError::Command("network events already taken".to_string()))
        })
    }

    /// Strategy 2: drive the page, then read the network set and the page itself.
    async fn interact(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        profile: &SiteProfile,
        cancel: &CancellationToken,
    ) -> Result<Vec<AudioCandidate>, ResolveError> {
        let mut observer = Self::observe(session, profile, CaptureMode::Classified)?;
        session.goto(url).await?;
        self.settle(&mut observer, self.timing.initial_load_ms, cancel).await?;

        let driver = InteractionDriver::new(profile.clone(), self.settle_multiplier);
        let report = driver.run(session, &mut observer, cancel).await;
        if report.cancelled {
            return Err(ResolveError::Cancelled);
        }
        debug!(
            target: "pipeline",
            clicked = report.clicked.len(),
            hovered = report.hovered.len(),
            reloaded = report.reloaded,
            audio_found = report.audio_found,
            "interaction finished"
        );

        self.settle(&mut observer, self.timing.settle_ms, cancel).await?;
        observer.drain().await;

        if !observer.has_candidates() {
            match session.content().await {
                Ok(html) => {
                    let embedded = media_urls_in_text(&html)
                        .into_iter()
                        .filter(|found| profile.media_host_markers.is_empty() || profile.is_media_host(found));
                    let added = observer.ingest_urls(embedded, Provenance::PageContent);
                    if added > 0 {
                        info!(target: "pipeline", %url, added, "media urls found in page content");
                    }
                }
                Err(err) => debug!(target: "pipeline", %url, error = %err, "page content unavailable"),
            }
        }

        Ok(observer.finish())
    }

    /// Strategy 3: record every URL for a long window and classify afterwards.
    async fn capture_all(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        profile: &SiteProfile,
        cancel: &CancellationToken,
    ) -> Result<Vec<AudioCandidate>, ResolveError> {
        let mut observer = Self::observe(session, profile, CaptureMode::CaptureAll)?;
        session.goto(url).await?;
        self.settle(&mut observer, self.timing.initial_load_ms, cancel).await?;

        for selector in &profile.play_selectors {
            match session.click_first(selector).await {
                Ok(true) => {
                    debug!(target: "pipeline", %selector, "aggressive capture clicked play control");
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(target: "pipeline", %selector, error = %err, "click failed");
                    break;
                }
            }
        }

        self.settle(&mut observer, self.timing.aggressive_capture_ms, cancel).await?;
        observer.drain().await;
        debug!(target: "pipeline", %url, captured = observer.captured_len(), "capture window closed");
        Ok(observer.finish())
    }
}
