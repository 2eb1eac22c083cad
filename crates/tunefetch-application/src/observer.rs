// SPDX-License-Identifier: GPL-3.0-or-later
//! Network observation for one browser session.
//!
//! The observer owns the session's event receiver and an append-only
//! candidate set. The orchestrator keeps it draining while a page settles
//! and polls it between interaction steps; nothing else writes to the set.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, trace};
use tunefetch_domain::{AudioCandidate, Provenance};
use tunefetch_infrastructure::{BrowserSession, NetworkEvent};

use crate::classifier::AudioClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Classify each event as it arrives.
    Classified,
    /// Keep every URL and classify once the window closes.
    CaptureAll,
}

/// Insertion-ordered, duplicate-free list of audio candidates.
#[derive(Debug, Default, Clone)]
pub struct CandidateSet {
    items: Vec<AudioCandidate>,
    seen: HashSet<String>,
}

impl CandidateSet {
    /// Returns `false` when the URL was already present.
    pub fn insert(&mut self, candidate: AudioCandidate) -> bool {
        if !self.seen.insert(candidate.url.clone()) {
            return false;
        }
        self.items.push(candidate);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[AudioCandidate] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<AudioCandidate> {
        self.items
    }
}

#[derive(Debug, Clone)]
struct CapturedUrl {
    url: String,
    provenance: Provenance,
    resource_type: Option<String>,
    content_type: Option<String>,
}

pub struct NetworkObserver {
    events: mpsc::Receiver<NetworkEvent>,
    classifier: AudioClassifier,
    mode: CaptureMode,
    candidates: CandidateSet,
    captured: Vec<CapturedUrl>,
    captured_seen: HashSet<String>,
    disconnected: bool,
}

impl NetworkObserver {
    pub fn new(
        events: mpsc::Receiver<NetworkEvent>,
        classifier: AudioClassifier,
        mode: CaptureMode,
    ) -> Self {
        Self {
            events,
            classifier,
            mode,
            candidates: CandidateSet::default(),
            captured: Vec::new(),
            captured_seen: HashSet::new(),
            disconnected: false,
        }
    }

    /// Subscribes to a session's traffic. `None` if the stream was already taken.
    pub fn attach(
        session: &mut dyn BrowserSession,
        classifier: AudioClassifier,
        mode: CaptureMode,
    ) -> Option<Self> {
        session
            .take_network_events()
            .map(|events| Self::new(events, classifier, mode))
    }

    /// Drains pending events without waiting. Returns how many new
    /// candidates were added.
    pub fn poll(&mut self) -> usize {
        let before = self.candidates.len();
        while !self.disconnected {
            match self.events.try_recv() {
                Ok(event) => self.ingest(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!(target: "observer", "network event stream closed");
                    self.disconnected = true;
                }
            }
        }
        self.candidates.len() - before
    }

    /// Keeps receiving events until `window` elapses. A busy page cannot
    /// fill the channel and stall its producers while we wait. Returns how
    /// many new candidates were added.
    pub async fn watch(&mut self, window: Duration) -> usize {
        let before = self.candidates.len();
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        while !self.disconnected {
            tokio::select! {
                _ = &mut deadline => return self.candidates.len() - before,
                event = self.events.recv() => match event {
                    Some(event) => self.ingest(event),
                    None => {
                        debug!(target: "observer", "network event stream closed");
                        self.disconnected = true;
                    }
                },
            }
        }
        deadline.await;
        self.candidates.len() - before
    }

    /// Yields once so producers can flush what they hold, then polls.
    pub async fn drain(&mut self) -> usize {
        tokio::task::yield_now().await;
        self.poll()
    }

    fn ingest(&mut self, event: NetworkEvent) {
        let provenance = match event {
            NetworkEvent::Request { .. } => Provenance::Request,
            NetworkEvent::Response { .. } => Provenance::Response,
        };
        let content_type = event.content_type().map(str::to_string);

        match self.mode {
            CaptureMode::Classified => {
                let verdict = self.classifier.classify_event(&event);
                trace!(target: "observer", url = %event.url(), ?verdict, "classified");
                if verdict.is_audio() {
                    let candidate =
                        AudioCandidate::new(event.url(), provenance).with_content_type(content_type);
                    if self.candidates.insert(candidate) {
                        debug!(target: "observer", url = %event.url(), ?verdict, "audio candidate");
                    }
                }
            }
            CaptureMode::CaptureAll => {
                let url = event.url().to_string();
                if self.captured_seen.insert(url.clone()) {
                    self.captured.push(CapturedUrl {
                        url,
                        provenance: Provenance::Capture,
                        resource_type: event.resource_type().map(str::to_string),
                        content_type,
                    });
                } else if let Some(existing) = self.captured.iter_mut().find(|c| c.url == event.url()) {
                    // A later response may carry the content type the request lacked.
                    if existing.content_type.is_none() {
                        existing.content_type = content_type;
                    }
                }
            }
        }
    }

    /// Adds URLs found outside the network stream, through the same classifier.
    pub fn ingest_urls(&mut self, urls: impl IntoIterator<Item = String>, provenance: Provenance) -> usize {
        let before = self.candidates.len();
        for url in urls {
            if self.classifier.is_audio(&url, None, None) {
                self.candidates.insert(AudioCandidate::new(url, provenance));
            }
        }
        self.candidates.len() - before
    }

    pub fn candidates(&self) -> &[AudioCandidate] {
        self.candidates.as_slice()
    }

    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// Number of URLs seen in capture-all mode.
    pub fn captured_len(&self) -> usize {
        self.captured.len()
    }

    /// Final poll; capture-all mode classifies its backlog here.
    pub fn finish(mut self) -> Vec<AudioCandidate> {
        self.poll();
        for captured in std::mem::take(&mut self.captured) {
            if self.classifier.is_audio(
                &captured.url,
                captured.resource_type.as_deref(),
                captured.content_type.as_deref(),
            ) {
                self.candidates.insert(
                    AudioCandidate::new(captured.url, captured.provenance)
                        .with_content_type(captured.content_type),
                );
            }
        }
        self.candidates.into_vec()
    }
}
