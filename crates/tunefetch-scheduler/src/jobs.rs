// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult};
use anyhow::Result;
use std::time::Duration;
use tracing::info;
use tunefetch_application::JobTracker;

/// Drops download jobs older than the retention window, with their files.
pub struct JobSweepJob {
    tracker: JobTracker,
    retention: Duration,
}

impl JobSweepJob {
    pub fn new(tracker: JobTracker, retention: Duration) -> Self {
        Self { tracker, retention }
    }
}

#[async_trait::async_trait]
impl Job for JobSweepJob {
    fn job_type(&self) -> &'static str {
        "job-sweep"
    }

    fn name(&self) -> String {
        "Expired download job sweep".to_string()
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
        let removed = self.tracker.purge_expired(self.retention).await;
        info!(
            target: "jobs",
            job_id = %ctx.job_id,
            removed,
            remaining = self.tracker.len(),
            retention_secs = self.retention.as_secs(),
            "job sweep completed"
        );
        Ok(JobResult::Success)
    }

    fn is_retriable(&self) -> bool {
        // The next tick covers whatever this run missed.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_keeps_jobs_inside_the_retention_window() {
        let tracker = JobTracker::new();
        tracker.create("fresh");
        let job = JobSweepJob::new(tracker.clone(), Duration::from_secs(3600));

        let result = job.execute(JobContext::new("job-sweep", 1)).await.unwrap();
        assert_eq!(result, JobResult::Success);
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn zero_retention_sweeps_everything() {
        let tracker = JobTracker::new();
        tracker.create("a");
        tracker.create("b");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let job = JobSweepJob::new(tracker.clone(), Duration::ZERO);
        job.execute(JobContext::new("job-sweep", 1)).await.unwrap();
        assert!(tracker.is_empty());
    }
}
