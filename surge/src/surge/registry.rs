use crate::job_id;
use common_types::JobStatus;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use surge_executor::{start, HttpClient, RunConfig, RunError, RunMonitor};
use surge_http::{GenericError, Profile};
use surge_metrics::{MetricSummary, MetricsFactory};
use surge_thresholds::Verdict;
use tokio::sync::RwLock;

type Jobs = Arc<RwLock<BTreeMap<String, RunMonitor>>>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub verdict: Verdict,
}

/// Runs started through the http endpoints, by job id
pub struct JobRegistry {
    jobs: Jobs,
    metrics: Arc<MetricsFactory>,
    client: Arc<dyn HttpClient>,
    config: RunConfig,
    /// How long a finished job stays queryable, status, verdict and prometheus metrics alike
    retention: Duration,
}

impl JobRegistry {
    pub fn new(
        metrics: Arc<MetricsFactory>,
        client: Arc<dyn HttpClient>,
        config: RunConfig,
    ) -> Self {
        Self {
            jobs: Jobs::default(),
            metrics,
            client,
            config,
            retention: Duration::from_secs(common_env::job_retention_secs()),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn metrics_factory(&self) -> &MetricsFactory {
        &self.metrics
    }

    pub async fn submit(&self, profile: Profile) -> Result<String, GenericError> {
        let job_id = job_id(&profile.name);
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job_id) {
            warn!("[submit] - [{}] - job already exists", &job_id);
            return Err(GenericError::new(
                &format!("Job {} already exists", &job_id),
                409,
            ));
        }
        let metrics = self
            .metrics
            .metrics_with_buckets(profile.histogram_buckets.to_vec(), &job_id)
            .await
            .map_err(|e| GenericError::internal_500(&e.to_string()))?;
        let handle = match start(&profile, self.config, self.client.clone(), metrics) {
            Ok(handle) => handle,
            Err(e) => {
                self.metrics.remove_metrics(&job_id).await;
                return Err(run_error_to_generic_error(e));
            }
        };
        jobs.insert(job_id.clone(), handle.monitor());
        drop(jobs);

        let jobs = self.jobs.clone();
        let factory = self.metrics.clone();
        let retention = self.retention;
        let id = job_id.clone();
        tokio::spawn(async move {
            match handle.await_completion().await {
                Ok(report) => info!(
                    "[submit] - [{}] - {:?}, passed: {}, failed thresholds: {:?}",
                    &id,
                    report.outcome,
                    report.verdict.overall_pass,
                    report.verdict.failed().collect::<Vec<_>>()
                ),
                Err(failure) => error!("[submit] - [{}] - run failed: {}", &id, failure.error),
            }
            tokio::time::sleep(retention).await;
            cleanup_job(&jobs, &factory, &id).await;
        });
        Ok(job_id)
    }

    /// Cancel a job, returns its status from before the call
    pub async fn stop(&self, job_id: &str) -> Option<JobStatus> {
        let guard = self.jobs.read().await;
        let monitor = guard.get(job_id)?;
        let status = monitor.status();
        if !status.is_finished() {
            info!("[stop] - [{}] - stopping job", job_id);
            monitor.cancel();
        }
        Some(status)
    }

    /// Status of the jobs whose id starts with `job_id`
    pub async fn job_status(&self, job_id: &str) -> HashMap<String, JobStatus> {
        self.jobs
            .read()
            .await
            .iter()
            .filter(|(id, _)| id.starts_with(job_id))
            .map(|(id, monitor)| (id.clone(), monitor.status()))
            .collect()
    }

    pub async fn all_status(&self, offset: usize, limit: usize) -> HashMap<String, JobStatus> {
        self.jobs
            .read()
            .await
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(id, monitor)| (id.clone(), monitor.status()))
            .collect()
    }

    pub async fn report(&self, job_id: &str) -> Option<JobReport> {
        let guard = self.jobs.read().await;
        let monitor = guard.get(job_id)?;
        let snapshot = monitor.snapshot();
        Some(JobReport {
            job_id: job_id.to_string(),
            status: monitor.status(),
            metrics: snapshot.summary(),
            verdict: monitor.verdict(),
        })
    }
}

async fn cleanup_job(jobs: &Jobs, factory: &MetricsFactory, job_id: &str) {
    info!("[cleanup_job] - [{}] - removing finished job", job_id);
    jobs.write().await.remove(job_id);
    factory.remove_metrics(job_id).await;
}

fn run_error_to_generic_error(e: RunError) -> GenericError {
    match e {
        RunError::Profile(e) => e.into(),
        RunError::Threshold(e) => e.into(),
        e => GenericError::internal_500(&e.to_string()),
    }
}
