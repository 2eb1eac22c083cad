// SPDX-License-Identifier: GPL-3.0-or-later
//! Background download jobs: search, resolve, fetch, and report progress.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use tunefetch_config::FetcherConfig;
use tunefetch_domain::{
    DownloadJob, ExtractionResult, JobEvent, JobId, JobOutput, JobStatus, SearchQuery, StoredFile,
};
use url::Url;

use crate::error::ResolveError;
use crate::fetcher::{extension_for, Fetcher};
use crate::jobs::{JobReporter, JobTracker};
use crate::pipeline::AudioResolutionPipeline;

const MAX_STEM_CHARS: usize = 60;

/// Work a job was started with.
#[derive(Debug, Clone)]
enum JobRequest {
    Search(SearchQuery),
    Direct {
        song_url: String,
        audio_url: Option<String>,
    },
}

impl JobRequest {
    fn initial_status(&self) -> JobStatus {
        match self {
            JobRequest::Search(_) => JobStatus::Searching,
            JobRequest::Direct { audio_url: Some(_), .. } => JobStatus::Downloading,
            JobRequest::Direct { audio_url: None, .. } => JobStatus::Extracting,
        }
    }
}

fn validate_http_url(raw: &str, field: &str) -> Result<String, ResolveError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|_| ResolveError::InvalidRequest(format!("{field} must be an absolute http(s) URL")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed.to_string()),
        _ => Err(ResolveError::InvalidRequest(format!(
            "{field} must be an absolute http(s) URL"
        ))),
    }
}

/// File name stem: the label reduced to safe characters plus the job id prefix.
fn file_stem(label: &str, id: JobId) -> String {
    let mut cleaned = String::new();
    let mut last_was_sep = true;
    for c in label.chars() {
        if c.is_alphanumeric() {
            cleaned.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            cleaned.push('_');
            last_was_sep = true;
        }
        if cleaned.chars().count() >= MAX_STEM_CHARS {
            break;
        }
    }
    let cleaned = cleaned.trim_matches('_');
    let id = id.to_string();
    let short_id = &id[..8];
    if cleaned.is_empty() {
        format!("audio_{short_id}")
    } else {
        format!("{cleaned}_{short_id}")
    }
}

pub struct DownloadService {
    pipeline: Arc<AudioResolutionPipeline>,
    fetcher: Fetcher,
    tracker: JobTracker,
    download_dir: PathBuf,
    store_files: bool,
    shutdown: CancellationToken,
}

impl DownloadService {
    pub fn new(
        pipeline: Arc<AudioResolutionPipeline>,
        fetcher: Fetcher,
        tracker: JobTracker,
        config: &FetcherConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            fetcher,
            tracker,
            download_dir: config.download_dir.clone(),
            store_files: config.store_files,
            shutdown,
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Starts a search-and-download job.
    pub fn start_search(self: &Arc<Self>, query: SearchQuery) -> Result<DownloadJob, ResolveError> {
        if query.song_name.trim().is_empty() {
            return Err(ResolveError::InvalidRequest("songName is required".to_string()));
        }
        let label = query.to_string();
        Ok(self.spawn(label, JobRequest::Search(query)))
    }

    /// Starts a job for a known song page, optionally with an already known audio URL.
    pub fn start_direct(
        self: &Arc<Self>,
        song_url: &str,
        audio_url: Option<&str>,
    ) -> Result<DownloadJob, ResolveError> {
        let song_url = validate_http_url(song_url, "songUrl")?;
        let audio_url = audio_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| validate_http_url(url, "audioUrl"))
            .transpose()?;
        Ok(self.spawn(song_url.clone(), JobRequest::Direct { song_url, audio_url }))
    }

    /// Registers the job and runs it in the background. Returns the job as
    /// created.
    fn spawn(self: &Arc<Self>, label: String, request: JobRequest) -> DownloadJob {
        let job = self.tracker.create_with_status(label, request.initial_status());
        let id = job.id;
        let stem = file_stem(&job.label, id);
        let service = Arc::clone(self);
        let span = tracing::info_span!("job", job_id = %id);
        tokio::spawn(
            async move {
                info!(target: "jobs", ?request, "job started");
                match service.run(id, &stem, request).await {
                    Ok(output) => {
                        info!(target: "jobs", audio_url = %output.audio_url(), "job completed");
                        service.tracker.report(id, JobEvent::Completed(output));
                    }
                    Err(err) => {
                        error!(target: "jobs", error = %err, "job failed");
                        service.tracker.report(id, JobEvent::Failed(err.user_message()));
                    }
                }
            }
            .instrument(span),
        );
        job
    }

    fn progress(&self, id: JobId, status: JobStatus, progress: u8) {
        self.tracker.report(id, JobEvent::Progress { status, progress });
    }

    async fn run(&self, id: JobId, stem: &str, request: JobRequest) -> Result<JobOutput, ResolveError> {
        match request {
            JobRequest::Search(query) => {
                self.progress(id, JobStatus::Searching, 10);
                let chosen = self.pipeline.locate(&query, &self.shutdown).await?;
                self.resolve_and_fetch(id, &chosen.candidate.url, stem).await
            }
            JobRequest::Direct {
                song_url,
                audio_url: Some(audio_url),
            } => {
                self.progress(id, JobStatus::Downloading, 60);
                if !self.store_files {
                    return Ok(JobOutput::Remote { audio_url });
                }
                let destination = self
                    .download_dir
                    .join(format!("{stem}.{}", extension_for(&audio_url)));
                match self.fetcher.download(&audio_url, &destination, Some(&song_url)).await {
                    Ok(file) => Ok(JobOutput::File { file, audio_url }),
                    Err(err) => {
                        warn!(target: "jobs", %audio_url, error = %err, "known audio url failed, resolving the page");
                        self.resolve_and_fetch(id, &song_url, stem).await
                    }
                }
            }
            JobRequest::Direct {
                song_url,
                audio_url: None,
            } => self.resolve_and_fetch(id, &song_url, stem).await,
        }
    }

    async fn resolve_and_fetch(&self, id: JobId, song_url: &str, stem: &str) -> Result<JobOutput, ResolveError> {
        self.progress(id, JobStatus::Extracting, 30);
        let result = self.pipeline.resolve(song_url, &self.shutdown).await?;
        self.progress(id, JobStatus::Downloading, 60);

        if !self.store_files {
            return remote_output(&result);
        }

        match self.fetch(&result, stem).await {
            Ok((file, audio_url)) => Ok(JobOutput::File { file, audio_url }),
            Err(ResolveError::FetchFailed { url, reason, .. }) => {
                // Resolved links can expire between resolution and download.
                warn!(target: "jobs", %url, %reason, "download failed, re-resolving once");
                let refreshed = self.pipeline.refresh(song_url, &self.shutdown).await?;
                let (file, audio_url) = self.fetch(&refreshed, stem).await?;
                Ok(JobOutput::File { file, audio_url })
            }
            Err(other) => Err(other),
        }
    }

    async fn fetch(&self, result: &ExtractionResult, stem: &str) -> Result<(StoredFile, String), ResolveError> {
        self.fetcher
            .download_best(result, &self.download_dir, stem, self.pipeline.quality_ladder())
            .await
    }
}

fn remote_output(result: &ExtractionResult) -> Result<JobOutput, ResolveError> {
    result
        .best_quality()
        .map(|best| JobOutput::Remote {
            audio_url: best.url.clone(),
        })
        .ok_or(ResolveError::NoAudioDetected {
            strategies_attempted: 0,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeLauncher, FakeProbe};
    use reqwest::Client;
    use std::time::Duration;
    use tunefetch_config::AppConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(
        launcher: FakeLauncher,
        probe: FakeProbe,
        fetcher_config: FetcherConfig,
    ) -> Arc<DownloadService> {
        let config = AppConfig::default();
        let pipeline = Arc::new(AudioResolutionPipeline::new(
            Arc::new(launcher),
            Arc::new(probe),
            &config,
        ));
        Arc::new(DownloadService::new(
            pipeline,
            Fetcher::new(Client::new(), &fetcher_config),
            JobTracker::new(),
            &fetcher_config,
            CancellationToken::new(),
        ))
    }

    async fn wait_for_terminal(service: &DownloadService, id: JobId) -> DownloadJob {
        for _ in 0..200 {
            let job = service.tracker().get(id).expect("job exists");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {id} did not finish");
    }

    #[test]
    fn file_stems_are_filesystem_safe() {
        let id = JobId::new();
        let stem = file_stem("\"Kesariya\" by Arijit Singh", id);
        assert!(stem.starts_with("kesariya_by_arijit_singh_"));
        assert!(stem.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-'));
        assert!(file_stem("???", id).starts_with("audio_"));
    }

    #[tokio::test]
    async fn rejects_invalid_direct_urls() {
        let service = service(FakeLauncher::default(), FakeProbe::default(), FetcherConfig::default());
        assert!(matches!(
            service.start_direct("ftp://example.org/song", None),
            Err(ResolveError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.start_direct("https://www.jiosaavn.com/song/x/1", Some("not a url")),
            Err(ResolveError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.start_search(SearchQuery::new("  ", None)),
            Err(ResolveError::InvalidRequest(_))
        ));
        assert!(service.tracker().is_empty());
    }

    #[tokio::test]
    async fn direct_job_resolves_and_stores_the_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/abc_160.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let audio = format!("{}/media/abc_160.mp4", server.uri());
        let service = service(
            FakeLauncher::default(),
            FakeProbe::returning(&[&audio]),
            FetcherConfig {
                download_dir: dir.path().to_path_buf(),
                retry_delay_ms: 10,
                ..FetcherConfig::default()
            },
        );

        let started = service
            .start_direct("https://www.jiosaavn.com/song/kesariya/OQMaey5hbVc", None)
            .unwrap();
        assert_eq!(started.status, JobStatus::Extracting);
        let job = wait_for_terminal(&service, started.id).await;

        assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
        assert_eq!(job.progress, 100);
        let output = job.output.unwrap();
        assert_eq!(output.audio_url(), audio);
        let file = output.stored_file().unwrap();
        assert_eq!(file.byte_size, 4096);
        assert!(file.path.starts_with(dir.path()));
        assert!(file.path.exists());
    }

    #[tokio::test]
    async fn known_audio_url_skips_resolution_when_not_storing() {
        let probe = FakeProbe::default();
        let service = service(
            FakeLauncher::failing(),
            probe,
            FetcherConfig {
                store_files: false,
                ..FetcherConfig::default()
            },
        );
        let started = service
            .start_direct(
                "https://www.jiosaavn.com/song/kesariya/OQMaey5hbVc",
                Some("https://aac.saavncdn.com/815/abc_320.mp4"),
            )
            .unwrap();
        assert_eq!(started.status, JobStatus::Downloading);
        let job = wait_for_terminal(&service, started.id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.output,
            Some(JobOutput::Remote {
                audio_url: "https://aac.saavncdn.com/815/abc_320.mp4".to_string()
            })
        );
    }

    #[tokio::test]
    async fn search_failure_is_reported_as_a_readable_message() {
        let service = service(FakeLauncher::failing(), FakeProbe::default(), FetcherConfig::default());
        let started = service
            .start_search(SearchQuery::new("Kesariya", Some("Arijit Singh".to_string())))
            .unwrap();
        assert_eq!(started.status, JobStatus::Searching);
        let job = wait_for_terminal(&service, started.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 10);
        assert!(job.error.unwrap().contains("automated browser"));
    }
}
