// SPDX-License-Identifier: GPL-3.0-or-later
//! Best-effort page interactions that make a player start fetching audio.
//!
//! Each step is bounded by a timeout, checks for cancellation, and ends with
//! a poll of the observer; the sequence stops as soon as audio shows up.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tunefetch_config::SiteProfile;
use tunefetch_infrastructure::{BrowserError, BrowserSession, ScrollPosition};

use crate::observer::NetworkObserver;

const STEP_TIMEOUT: Duration = Duration::from_secs(15);

/// What the sequence did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InteractionReport {
    pub clicked: Vec<String>,
    pub hovered: Vec<String>,
    pub scrolled: bool,
    pub reloaded: bool,
    pub cancelled: bool,
    pub audio_found: bool,
}

#[derive(Debug, Clone)]
pub struct InteractionDriver {
    profile: SiteProfile,
    settle_multiplier: f64,
}

impl InteractionDriver {
    pub fn new(profile: SiteProfile, settle_multiplier: f64) -> Self {
        Self {
            profile,
            settle_multiplier: settle_multiplier.max(0.0),
        }
    }

    fn scaled(&self, millis: u64) -> Duration {
        Duration::from_secs_f64(millis as f64 * self.settle_multiplier / 1000.0)
    }

    /// Waits a scaled delay while the observer drains. Returns `false` if
    /// cancelled meanwhile.
    async fn settle(&self, observer: &mut NetworkObserver, millis: u64, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = observer.watch(self.scaled(millis)) => true,
            _ = cancel.cancelled() => false,
        }
    }

    /// Runs one session operation under the step timeout. Failures count as
    /// "nothing happened".
    async fn step<F>(&self, name: &str, operation: F) -> bool
    where
        F: Future<Output = Result<bool, BrowserError>>,
    {
        match tokio::time::timeout(STEP_TIMEOUT, operation).await {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => {
                debug!(target: "interaction", step = name, error = %err, "step failed");
                false
            }
            Err(_) => {
                debug!(target: "interaction", step = name, "step timed out");
                false
            }
        }
    }

    fn found(&self, observer: &mut NetworkObserver, report: &mut InteractionReport) -> bool {
        observer.poll();
        report.audio_found = observer.has_candidates();
        report.audio_found
    }

    /// Play clicks, then scrolling, then hovering, then a reload and one more
    /// round of play clicks. Never fails.
    pub async fn run(
        &self,
        session: &mut dyn BrowserSession,
        observer: &mut NetworkObserver,
        cancel: &CancellationToken,
    ) -> InteractionReport {
        let mut report = InteractionReport::default();
        if self.found(observer, &mut report) {
            return report;
        }

        if self.click_play(session, observer, cancel, &mut report).await
            || report.cancelled
        {
            return report;
        }

        for position in [ScrollPosition::Bottom, ScrollPosition::Middle, ScrollPosition::Top] {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return report;
            }
            let scrolled = self
                .step("scroll", async { session.scroll_to(position).await.map(|_| true) })
                .await;
            report.scrolled |= scrolled;
            if !self.settle(observer, self.profile.scroll_settle_ms, cancel).await {
                report.cancelled = true;
                return report;
            }
            if self.found(observer, &mut report) {
                return report;
            }
        }

        for selector in &self.profile.hover_selectors {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return report;
            }
            if !self.step("hover", session.hover_first(selector)).await {
                continue;
            }
            report.hovered.push(selector.clone());
            if !self.settle(observer, self.profile.hover_settle_ms, cancel).await {
                report.cancelled = true;
                return report;
            }
            if self.found(observer, &mut report) {
                return report;
            }
        }

        // Second chance: some players only wire up after a fresh load.
        if cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }
        info!(target: "interaction", "no audio yet, reloading page for a second attempt");
        report.reloaded = self
            .step("reload", async { session.reload().await.map(|_| true) })
            .await;
        if !self.settle(observer, self.profile.click_settle_ms, cancel).await {
            report.cancelled = true;
            return report;
        }
        if self.found(observer, &mut report) {
            return report;
        }
        self.click_play(session, observer, cancel, &mut report).await;
        report
    }

    /// Tries every play selector until audio appears.
    async fn click_play(
        &self,
        session: &mut dyn BrowserSession,
        observer: &mut NetworkObserver,
        cancel: &CancellationToken,
        report: &mut InteractionReport,
    ) -> bool {
        for selector in &self.profile.play_selectors {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return false;
            }
            if !self.step("click", session.click_first(selector)).await {
                continue;
            }
            debug!(target: "interaction", %selector, "clicked play control");
            report.clicked.push(selector.clone());
            if !self.settle(observer, self.profile.click_settle_ms, cancel).await {
                report.cancelled = true;
                return false;
            }
            if self.found(observer, report) {
                return true;
            }
        }
        false
    }
}
