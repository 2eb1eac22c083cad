// SPDX-License-Identifier: GPL-3.0-or-later
pub mod job;
pub mod jobs;
pub mod registry;

use anyhow::Result;
use registry::JobRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tunefetch_application::JobTracker;
use tunefetch_config::AppConfig;

use jobs::JobSweepJob;

pub struct Scheduler {
    config: AppConfig,
    tracker: JobTracker,
    registry: Arc<JobRegistry>,
}

impl Scheduler {
    pub fn new(config: AppConfig, tracker: JobTracker) -> Self {
        let registry = Arc::new(JobRegistry::new(config.scheduler.max_concurrent_jobs));
        Self {
            config,
            tracker,
            registry,
        }
    }

    pub async fn register_jobs(&self) {
        info!(target: "scheduler", "registering background jobs");

        self.registry
            .register(
                "job-sweep",
                JobSweepJob::new(
                    self.tracker.clone(),
                    Duration::from_secs(self.config.jobs.retention_secs),
                ),
                Schedule::Interval(self.config.jobs.sweep_interval_secs),
            )
            .await;

        info!(target: "scheduler", "all jobs registered");
    }

    /// Runs the registry in the background until `shutdown` fires.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<Result<()>> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            registry.run(shutdown).await;
            Ok(())
        })
    }
}

pub use job::{Job, JobContext, JobResult};
pub use registry::Schedule;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_the_sweep_and_stops_on_shutdown() {
        let scheduler = Scheduler::new(AppConfig::default(), JobTracker::new());
        scheduler.register_jobs().await;
        assert_eq!(scheduler.registry.job_ids().await, vec!["job-sweep".to_string()]);

        let shutdown = CancellationToken::new();
        let handle = scheduler.start(shutdown.clone());
        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
