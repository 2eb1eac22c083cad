// SPDX-License-Identifier: GPL-3.0-or-later
//! Scripted in-memory browser and probe used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tunefetch_config::SiteProfile;
use tunefetch_domain::{AudioCandidate, Provenance};
use tunefetch_infrastructure::{
    BrowserError, BrowserLauncher, BrowserSession, NetworkEvent, ScrollPosition, SessionOptions,
};

use crate::direct_api::MediaProbe;

pub type ActionLog = Arc<Mutex<Vec<String>>>;

pub fn audio_request(url: &str) -> NetworkEvent {
    NetworkEvent::Request {
        url: url.to_string(),
        resource_type: Some("media".to_string()),
        headers: Vec::new(),
    }
}

pub fn plain_request(url: &str) -> NetworkEvent {
    NetworkEvent::Request {
        url: url.to_string(),
        resource_type: Some("xhr".to_string()),
        headers: Vec::new(),
    }
}

pub struct FakeSession {
    pages: HashMap<String, String>,
    search_results: HashMap<String, String>,
    inputs: HashSet<String>,
    failing_searches: HashSet<String>,
    clickable: HashSet<String>,
    on_goto: HashMap<String, Vec<NetworkEvent>>,
    on_click: HashMap<String, Vec<NetworkEvent>>,
    on_reload: Vec<NetworkEvent>,
    current_html: String,
    current_url: Option<String>,
    sender: mpsc::Sender<NetworkEvent>,
    receiver: Option<mpsc::Receiver<NetworkEvent>>,
    log: ActionLog,
    closed: bool,
    stall_goto: bool,
}

impl FakeSession {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(256);
        Self {
            pages: HashMap::new(),
            search_results: HashMap::new(),
            inputs: HashSet::new(),
            failing_searches: HashSet::new(),
            clickable: HashSet::new(),
            on_goto: HashMap::new(),
            on_click: HashMap::new(),
            on_reload: Vec::new(),
            current_html: String::new(),
            current_url: None,
            sender,
            receiver: Some(receiver),
            log: Arc::new(Mutex::new(Vec::new())),
            closed: false,
            stall_goto: false,
        }
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn search_input(mut self, selector: &str) -> Self {
        self.inputs.insert(selector.to_string());
        self
    }

    /// Results page shown after submitting `text` into a search input.
    pub fn results_for(mut self, text: &str, html: &str) -> Self {
        self.search_results.insert(text.to_string(), html.to_string());
        self
    }

    /// Submitting `text` into a search input fails.
    pub fn failing_search(mut self, text: &str) -> Self {
        self.failing_searches.insert(text.to_string());
        self
    }

    pub fn clickable(mut self, selector: &str) -> Self {
        self.clickable.insert(selector.to_string());
        self
    }

    pub fn on_goto(mut self, url: &str, events: Vec<NetworkEvent>) -> Self {
        self.on_goto.insert(url.to_string(), events);
        self
    }

    pub fn on_click(mut self, selector: &str, events: Vec<NetworkEvent>) -> Self {
        self.clickable.insert(selector.to_string());
        self.on_click.insert(selector.to_string(), events);
        self
    }

    pub fn on_reload(mut self, events: Vec<NetworkEvent>) -> Self {
        self.on_reload = events;
        self
    }

    /// Navigation never completes.
    pub fn stalling(mut self) -> Self {
        self.stall_goto = true;
        self
    }

    pub fn log(&self) -> ActionLog {
        self.log.clone()
    }

    fn record(&self, action: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(action);
        }
    }

    fn emit(&self, events: &[NetworkEvent]) {
        for event in events {
            let _ = self.sender.try_send(event.clone());
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        if self.closed {
            return Err(BrowserError::Closed);
        }
        self.record(format!("goto:{url}"));
        if self.stall_goto {
            std::future::pending::<()>().await;
        }
        self.current_url = Some(url.to_string());
        self.current_html = self.pages.get(url).cloned().unwrap_or_default();
        if let Some(events) = self.on_goto.get(url) {
            self.emit(events);
        }
        Ok(())
    }

    async fn content(&mut self) -> Result<String, BrowserError> {
        Ok(self.current_html.clone())
    }

    async fn click_first(&mut self, selector: &str) -> Result<bool, BrowserError> {
        if !self.clickable.contains(selector) {
            return Ok(false);
        }
        self.record(format!("click:{selector}"));
        if let Some(events) = self.on_click.get(selector) {
            self.emit(events);
        }
        Ok(true)
    }

    async fn hover_first(&mut self, selector: &str) -> Result<bool, BrowserError> {
        self.record(format!("hover:{selector}"));
        Ok(false)
    }

    async fn fill_and_submit(&mut self, selector: &str, text: &str) -> Result<bool, BrowserError> {
        if !self.inputs.contains(selector) {
            return Ok(false);
        }
        self.record(format!("search:{text}"));
        if self.failing_searches.contains(text) {
            return Err(BrowserError::Command(format!("search for {text} failed")));
        }
        self.current_html = self.search_results.get(text).cloned().unwrap_or_default();
        Ok(true)
    }

    async fn scroll_to(&mut self, position: ScrollPosition) -> Result<(), BrowserError> {
        self.record(format!("scroll:{position:?}"));
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), BrowserError> {
        self.record("reload".to_string());
        let events = self.on_reload.clone();
        self.emit(&events);
        Ok(())
    }

    async fn current_url(&mut self) -> Result<Option<String>, BrowserError> {
        Ok(self.current_url.clone())
    }

    fn take_network_events(&mut self) -> Option<mpsc::Receiver<NetworkEvent>> {
        self.receiver.take()
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if !self.closed {
            self.closed = true;
            self.record("close".to_string());
        }
        Ok(())
    }
}

/// Hands out scripted sessions in order; empty sessions once the script runs out.
#[derive(Default)]
pub struct FakeLauncher {
    sessions: Mutex<VecDeque<FakeSession>>,
    launches: Mutex<usize>,
    fail: bool,
}

impl FakeLauncher {
    pub fn with_sessions(sessions: Vec<FakeSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.lock().map(|count| *count).unwrap_or(0)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _options: &SessionOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
        if let Ok(mut count) = self.launches.lock() {
            *count += 1;
        }
        if self.fail {
            return Err(BrowserError::Launch("no browser in tests".to_string()));
        }
        let session = self
            .sessions
            .lock()
            .ok()
            .and_then(|mut sessions| sessions.pop_front())
            .unwrap_or_else(FakeSession::new);
        Ok(Box::new(session))
    }
}

/// Metadata probe returning a fixed list and counting calls.
#[derive(Default)]
pub struct FakeProbe {
    urls: Vec<String>,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn returning(urls: &[&str]) -> Self {
        Self {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, _page_url: &str, _profile: &SiteProfile) -> Vec<AudioCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls
            .iter()
            .map(|url| AudioCandidate::new(url.clone(), Provenance::Api))
            .collect()
    }
}
