// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Search
// ============================================================================

/// What the caller is looking for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub song_name: String,
    pub artist: Option<String>,
}

impl SearchQuery {
    pub fn new(song_name: impl Into<String>, artist: Option<String>) -> Self {
        let artist = artist
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        Self {
            song_name: song_name.into().trim().to_string(),
            artist,
        }
    }

    pub fn artist(&self) -> &str {
        self.artist.as_deref().unwrap_or("")
    }

    /// Text typed into a search box: song name followed by the artist.
    pub fn search_text(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} {}", self.song_name, artist),
            None => self.song_name.clone(),
        }
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.artist {
            Some(artist) => write!(f, "\"{}\" by {}", self.song_name, artist),
            None => write!(f, "\"{}\"", self.song_name),
        }
    }
}

/// One entry scraped from a search results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCandidate {
    pub title: String,
    /// Empty when the page did not show an artist.
    pub artist: String,
    pub url: String,
    /// Zero-based rank on the results page.
    pub source_position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: ResultCandidate,
    pub score: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Outcome of matching a result set against a query.
///
/// A rejected decision never carries a chosen candidate; the best attempt is
/// kept separately so error messages can name it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchDecision {
    chosen: Option<ScoredCandidate>,
    confidence: Confidence,
    best_attempt: Option<ScoredCandidate>,
}

impl MatchDecision {
    pub fn accepted(candidate: ScoredCandidate, confidence: Confidence) -> Self {
        Self {
            best_attempt: Some(candidate.clone()),
            chosen: Some(candidate),
            confidence,
        }
    }

    pub fn rejected(best_attempt: Option<ScoredCandidate>) -> Self {
        Self {
            chosen: None,
            confidence: Confidence::Low,
            best_attempt,
        }
    }

    pub fn chosen(&self) -> Option<&ScoredCandidate> {
        self.chosen.as_ref()
    }

    pub fn into_chosen(self) -> Option<ScoredCandidate> {
        self.chosen
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    pub fn is_rejected(&self) -> bool {
        self.chosen.is_none()
    }

    pub fn best_attempt(&self) -> Option<&ScoredCandidate> {
        self.best_attempt.as_ref()
    }
}

// ============================================================================
// Audio resolution
// ============================================================================

/// How an audio URL was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Request,
    Response,
    /// Passive capture, classified after the window closed.
    Capture,
    /// Found in a metadata API payload.
    Api,
    /// Built from a CDN template and confirmed reachable.
    Constructed,
    /// Embedded in the rendered page.
    PageContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCandidate {
    pub url: String,
    pub provenance: Provenance,
    pub content_type: Option<String>,
}

impl AudioCandidate {
    pub fn new(url: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            url: url.into(),
            provenance,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Declared quality marker, e.g. `160` for `..._160.mp4`.
    pub fn quality(&self) -> Option<u32> {
        quality_marker(&self.url)
    }
}

/// Parses the trailing `_<digits>` quality marker of a media file name.
pub fn quality_marker(url: &str) -> Option<u32> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (stem, _ext) = file.rsplit_once('.')?;
    let (_, digits) = stem.rsplit_once('_')?;
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    DirectApi,
    BrowserAutomation,
    AggressiveCapture,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionStrategy::DirectApi => "direct-api",
            ResolutionStrategy::BrowserAutomation => "browser-automation",
            ResolutionStrategy::AggressiveCapture => "aggressive-capture",
        };
        f.write_str(name)
    }
}

/// Audio URLs resolved for one source page.
///
/// `audio_urls` is in first-observed order; position says nothing about quality.
/// Use [`ExtractionResult::best_quality`] for the highest declared bitrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub audio_urls: Vec<AudioCandidate>,
    pub source_page_url: String,
    pub strategy: ResolutionStrategy,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.audio_urls.is_empty()
    }

    /// Candidate with the highest quality marker; ties and unmarked URLs
    /// resolve to the earliest observed.
    pub fn best_quality(&self) -> Option<&AudioCandidate> {
        let mut best: Option<&AudioCandidate> = None;
        for candidate in &self.audio_urls {
            best = match best {
                None => Some(candidate),
                Some(current) if candidate.quality() > current.quality() => Some(candidate),
                Some(current) => Some(current),
            };
        }
        best
    }
}

// ============================================================================
// Download jobs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Searching,
    Extracting,
    Downloading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Searching => "searching",
            JobStatus::Extracting => "extracting",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub path: PathBuf,
    pub byte_size: u64,
}

/// What a completed job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutput {
    File { file: StoredFile, audio_url: String },
    Remote { audio_url: String },
}

impl JobOutput {
    pub fn audio_url(&self) -> &str {
        match self {
            JobOutput::File { audio_url, .. } | JobOutput::Remote { audio_url } => audio_url,
        }
    }

    pub fn stored_file(&self) -> Option<&StoredFile> {
        match self {
            JobOutput::File { file, .. } => Some(file),
            JobOutput::Remote { .. } => None,
        }
    }
}

/// State mutation reported by the pipeline while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Progress { status: JobStatus, progress: u8 },
    Completed(JobOutput),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: JobId,
    /// Song name or source URL, for display.
    pub label: String,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub output: Option<JobOutput>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadJob {
    pub fn new(label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            label: label.into(),
            status: JobStatus::Searching,
            progress: 0,
            error: None,
            output: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Starting stage other than searching, for jobs that skip it.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Applies an event. Terminal jobs ignore further events; progress never
    /// moves backwards.
    pub fn apply(&mut self, event: JobEvent) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match event {
            JobEvent::Progress { status, progress } => {
                self.status = status;
                self.progress = self.progress.max(progress.min(100));
            }
            JobEvent::Completed(output) => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.output = Some(output);
            }
            JobEvent::Failed(message) => {
                self.status = JobStatus::Failed;
                self.error = Some(message);
            }
        }
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_query_trims_and_drops_blank_artist() {
        let query = SearchQuery::new("  Kesariya ", Some("   ".to_string()));
        assert_eq!(query.song_name, "Kesariya");
        assert_eq!(query.artist, None);
        assert_eq!(query.search_text(), "Kesariya");

        let query = SearchQuery::new("Kesariya", Some("Arijit Singh".to_string()));
        assert_eq!(query.search_text(), "Kesariya Arijit Singh");
    }

    #[test]
    fn rejected_decision_has_no_chosen_candidate() {
        let attempt = ScoredCandidate {
            candidate: ResultCandidate {
                title: "Other".to_string(),
                artist: String::new(),
                url: "https://example.org/song/other/1".to_string(),
                source_position: 0,
            },
            score: 120,
        };
        let decision = MatchDecision::rejected(Some(attempt.clone()));
        assert!(decision.is_rejected());
        assert!(decision.chosen().is_none());
        assert_eq!(decision.confidence(), Confidence::Low);
        assert_eq!(decision.best_attempt(), Some(&attempt));
    }

    #[test]
    fn quality_marker_parsing() {
        assert_eq!(quality_marker("https://aac.saavncdn.com/815/abc_160.mp4"), Some(160));
        assert_eq!(quality_marker("https://cdn.x/abc_320.mp4?sig=1"), Some(320));
        assert_eq!(quality_marker("https://cdn.x/track.mp3"), None);
        assert_eq!(quality_marker("https://cdn.x/my_song.mp3"), None);
    }

    #[test]
    fn best_quality_prefers_higher_marker_then_earliest() {
        let result = ExtractionResult {
            audio_urls: vec![
                AudioCandidate::new("https://cdn.x/a.mp3", Provenance::Request),
                AudioCandidate::new("https://cdn.x/b_96.mp4", Provenance::Request),
                AudioCandidate::new("https://cdn.x/c_160.mp4", Provenance::Response),
                AudioCandidate::new("https://cdn.x/d_160.mp4", Provenance::Response),
            ],
            source_page_url: "https://example.org/song/x/1".to_string(),
            strategy: ResolutionStrategy::BrowserAutomation,
        };
        assert_eq!(result.best_quality().map(|c| c.url.as_str()), Some("https://cdn.x/c_160.mp4"));
    }

    #[test]
    fn terminal_jobs_ignore_late_events() {
        let mut job = DownloadJob::new("Kesariya");
        assert!(job.apply(JobEvent::Progress { status: JobStatus::Downloading, progress: 60 }));
        assert!(job.apply(JobEvent::Progress { status: JobStatus::Extracting, progress: 30 }));
        assert_eq!(job.progress, 60);
        assert!(job.apply(JobEvent::Failed("boom".to_string())));
        assert!(!job.apply(JobEvent::Completed(JobOutput::Remote {
            audio_url: "https://cdn.x/a.mp3".to_string(),
        })));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn job_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
    }
}
