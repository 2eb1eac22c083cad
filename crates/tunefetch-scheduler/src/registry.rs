// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// When a registered job runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Every N seconds, starting immediately
    Interval(u64),
    /// A single run right after start
    Once,
}

struct RegisteredJob {
    job: Arc<dyn Job>,
    schedule: Schedule,
}

/// Runs registered jobs on their schedules with bounded concurrency until
/// the shutdown token fires.
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, RegisteredJob>>>,
    max_concurrent: usize,
}

impl JobRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn register(&self, job_id: impl Into<String>, job: impl Job + 'static, schedule: Schedule) {
        let job_id = job_id.into();
        let registered = RegisteredJob {
            job: Arc::new(job),
            schedule,
        };
        info!(
            target: "registry",
            %job_id,
            job_type = registered.job.job_type(),
            schedule = ?registered.schedule,
            "registering job"
        );
        self.jobs.write().await.insert(job_id, registered);
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drives every registered job until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(target: "registry", max_concurrent = self.max_concurrent, "starting job registry");
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut drivers = JoinSet::new();

        {
            let jobs = self.jobs.read().await;
            for (job_id, registered) in jobs.iter() {
                let job_id = job_id.clone();
                let job = registered.job.clone();
                let semaphore = semaphore.clone();
                let shutdown = shutdown.clone();
                match registered.schedule.clone() {
                    Schedule::Interval(seconds) => {
                        drivers.spawn(async move {
                            let mut ticker = interval(Duration::from_secs(seconds.max(1)));
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                            loop {
                                tokio::select! {
                                    _ = shutdown.cancelled() => break,
                                    _ = ticker.tick() => {}
                                }
                                let Ok(_permit) = semaphore.clone().acquire_owned().await else {
                                    break;
                                };
                                Self::execute_job(&job_id, job.clone()).await;
                            }
                            debug!(target: "registry", %job_id, "interval driver stopped");
                        });
                    }
                    Schedule::Once => {
                        drivers.spawn(async move {
                            if let Ok(_permit) = semaphore.acquire_owned().await {
                                tokio::select! {
                                    _ = shutdown.cancelled() => {}
                                    _ = Self::execute_job(&job_id, job) => {}
                                }
                            }
                        });
                    }
                }
            }
            info!(target: "registry", jobs = jobs.len(), "job registry started");
        }

        while drivers.join_next().await.is_some() {}
        info!(target: "registry", "job registry stopped");
    }

    /// Runs one job to completion, retrying per its policy. Returns the
    /// number of attempts made.
    pub(crate) async fn execute_job(job_id: &str, job: Arc<dyn Job>) -> u32 {
        let max_attempts = if job.is_retriable() {
            job.max_retries() + 1
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                target: "registry",
                %job_id,
                job_type = job.job_type(),
                attempt,
                max_attempts,
                "executing job"
            );

            let (error, retry) = match job.execute(JobContext::new(job_id, attempt)).await {
                Ok(JobResult::Success) => {
                    debug!(target: "registry", %job_id, attempt, "job completed");
                    return attempt;
                }
                Ok(JobResult::Failure { error, retry }) => (error, retry),
                Err(err) => (err.to_string(), job.is_retriable()),
            };

            error!(target: "registry", %job_id, job_type = job.job_type(), attempt, %error, retry, "job failed");
            if !retry || attempt >= max_attempts {
                return attempt;
            }
            let delay = Duration::from_secs(job.retry_delay_seconds());
            warn!(target: "registry", %job_id, ?delay, "retrying job after delay");
            tokio::time::sleep(delay).await;
        }
    }
}
