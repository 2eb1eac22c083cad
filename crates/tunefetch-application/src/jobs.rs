// SPDX-License-Identifier: GPL-3.0-or-later
//! In-memory job table shared by the HTTP layer, running jobs and the sweep.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use tunefetch_domain::{DownloadJob, JobEvent, JobId, JobStatus};

/// Sink for job state changes. Running jobs only ever talk to this.
pub trait JobReporter: Send + Sync {
    fn report(&self, id: JobId, event: JobEvent);
}

#[derive(Clone, Default)]
pub struct JobTracker {
    inner: Arc<RwLock<HashMap<JobId, DownloadJob>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves the map itself consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, DownloadJob>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, DownloadJob>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(&self, label: impl Into<String>) -> DownloadJob {
        self.create_with_status(label, JobStatus::Searching)
    }

    pub fn create_with_status(&self, label: impl Into<String>, status: JobStatus) -> DownloadJob {
        let job = DownloadJob::new(label).with_status(status);
        self.write().insert(job.id, job.clone());
        debug!(target: "jobs", job_id = %job.id, label = %job.label, "job created");
        job
    }

    /// Snapshot of one job.
    pub fn get(&self, id: JobId) -> Option<DownloadJob> {
        self.read().get(&id).cloned()
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<DownloadJob> {
        let mut jobs: Vec<DownloadJob> = self.read().values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes jobs created longer than `retention` ago and deletes their
    /// stored files. Returns how many jobs were removed.
    pub async fn purge_expired(&self, retention: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(retention) {
            Ok(retention) => Utc::now() - retention,
            Err(_) => return 0,
        };

        let expired: Vec<DownloadJob> = {
            let mut jobs = self.write();
            let ids: Vec<JobId> = jobs
                .values()
                .filter(|job| job.created_at < cutoff)
                .map(|job| job.id)
                .collect();
            ids.iter().filter_map(|id| jobs.remove(id)).collect()
        };

        for job in &expired {
            let Some(file) = job.output.as_ref().and_then(|output| output.stored_file()) else {
                continue;
            };
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => debug!(target: "jobs", job_id = %job.id, path = %file.path.display(), "deleted job file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(target: "jobs", job_id = %job.id, path = %file.path.display(), error = %err, "could not delete job file")
                }
            }
        }

        if !expired.is_empty() {
            info!(target: "jobs", removed = expired.len(), remaining = self.len(), "purged expired jobs");
        }
        expired.len()
    }
}

impl JobReporter for JobTracker {
    fn report(&self, id: JobId, event: JobEvent) {
        let mut jobs = self.write();
        let Some(job) = jobs.get_mut(&id) else {
            warn!(target: "jobs", job_id = %id, "event for unknown job");
            return;
        };
        if job.apply(event) {
            debug!(target: "jobs", job_id = %id, status = job.status.as_str(), progress = job.progress, "job updated");
        }
    }
}
