//! Runs a load profile: a controller samples the ramp and keeps that many virtual users busy,
//! each one looping over select, request, record, pace until it is drained.

mod client;
mod controller;
mod ramp;
mod selector;
mod vu;

pub use client::{ClientError, ClientResponse, HttpClient, HyperClient};
pub use controller::RunOutcome;
pub use ramp::Ramp;
pub use selector::{Endpoint, EndpointSelector};

use crate::controller::Controller;
use crate::vu::IterationContext;
use common_types::{ErrorCode, JobStatus};
use log::{error, info};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use surge_http::{Profile, ProfileError};
use surge_metrics::{Metrics, MetricsSnapshot};
use surge_thresholds::{ThresholdError, ThresholdEvaluator, Verdict};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
    #[error("ramp asks for {desired} virtual users, ceiling is {ceiling}")]
    ResourceExhausted { desired: u32, ceiling: u32 },
    #[error("invalid run config: {0}")]
    InvalidConfig(&'static str),
    #[error("run task failed: {0}")]
    Internal(String),
}

impl RunError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RunError::Profile(_) => ErrorCode::InvalidProfile,
            RunError::Threshold(_) => ErrorCode::InvalidThreshold,
            RunError::ResourceExhausted { .. } => ErrorCode::ResourceExhausted,
            RunError::InvalidConfig(_) | RunError::Internal(_) => ErrorCode::Others,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub control_interval: Duration,
    pub request_timeout: Duration,
    pub pacing: Duration,
    pub max_vus: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            control_interval: Duration::from_millis(common_env::control_interval_ms()),
            request_timeout: Duration::from_millis(common_env::request_timeout_ms()),
            pacing: Duration::from_millis(common_env::pacing_delay_ms()),
            max_vus: common_env::max_vus(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), RunError> {
        if self.control_interval.is_zero() {
            return Err(RunError::InvalidConfig("control interval must be non-zero"));
        }
        if self.max_vus == 0 {
            return Err(RunError::InvalidConfig("virtual user ceiling must be non-zero"));
        }
        Ok(())
    }

    /// Apply the profile's own timeout and pacing, if any
    pub fn for_profile(mut self, profile: &Profile) -> Self {
        if let Some(timeout) = profile.request_timeout {
            self.request_timeout = timeout.as_duration();
        }
        if let Some(pacing) = profile.pacing {
            self.pacing = pacing.as_duration();
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub verdict: Verdict,
    pub snapshot: MetricsSnapshot,
}

/// A run that ended with an error; metrics collected until then are kept
#[derive(Debug)]
pub struct RunFailure {
    pub error: RunError,
    pub snapshot: MetricsSnapshot,
}

/// Observe or stop a run from anywhere, cheap to clone
#[derive(Clone)]
pub struct RunMonitor {
    job_id: String,
    cancel: CancellationToken,
    status: watch::Receiver<JobStatus>,
    metrics: Arc<Metrics>,
    evaluator: Arc<ThresholdEvaluator>,
}

impl RunMonitor {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Drain every virtual user and stop the run
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Verdict over the metrics collected so far
    pub fn verdict(&self) -> Verdict {
        self.evaluator.evaluate(&self.snapshot())
    }

    pub async fn finished(&mut self) -> JobStatus {
        if let Err(e) = self.status.wait_for(|s| s.is_finished()).await {
            error!(
                "[finished] - [{}] - run task went away without a final status: {}",
                &self.job_id, e
            );
            return JobStatus::Error(ErrorCode::Others);
        }
        self.status()
    }
}

pub struct RunHandle {
    monitor: RunMonitor,
    handle: JoinHandle<Result<RunOutcome, RunError>>,
}

impl RunHandle {
    pub fn monitor(&self) -> RunMonitor {
        self.monitor.clone()
    }

    pub fn cancel(&self) {
        self.monitor.cancel();
    }

    pub fn status(&self) -> JobStatus {
        self.monitor.status()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.monitor.snapshot()
    }

    pub fn verdict(&self) -> Verdict {
        self.monitor.verdict()
    }

    pub async fn await_completion(self) -> Result<RunReport, RunFailure> {
        let result = self.handle.await;
        let snapshot = self.monitor.snapshot();
        match result {
            Ok(Ok(outcome)) => Ok(RunReport {
                outcome,
                verdict: self.monitor.evaluator.evaluate(&snapshot),
                snapshot,
            }),
            Ok(Err(error)) => Err(RunFailure { error, snapshot }),
            Err(e) => Err(RunFailure {
                error: RunError::Internal(e.to_string()),
                snapshot,
            }),
        }
    }
}

/// Validate the profile against the metrics and start the run in the background.
///
/// Thresholds naming unknown metrics, or aggregating a metric in a way that doesn't fit its kind,
/// fail here, before any request is sent.
pub fn start(
    profile: &Profile,
    config: RunConfig,
    client: Arc<dyn HttpClient>,
    metrics: Arc<Metrics>,
) -> Result<RunHandle, RunError> {
    let job_id = metrics.job_id().to_string();
    let evaluator = Arc::new(ThresholdEvaluator::new(
        &profile.thresholds,
        metrics.aggregates(),
    )?);
    let selector = EndpointSelector::new(&profile.endpoints, &profile.target)?;
    let config = config.for_profile(profile);
    config.validate()?;
    info!(
        "[start] - [{}] - {} endpoints, {} thresholds, {:?}",
        &job_id,
        selector.len(),
        profile.thresholds.len(),
        &config
    );

    let cancel = CancellationToken::new();
    let (status_tx, status_rx) = watch::channel(JobStatus::Starting);
    let ctx = Arc::new(IterationContext {
        job_id: job_id.clone(),
        selector,
        client,
        metrics: metrics.clone(),
        request_timeout: config.request_timeout,
        pacing: config.pacing,
        expected_status: profile.expected_status,
        cancel: cancel.clone(),
    });
    let controller = Controller::new(
        profile.stages.clone(),
        ctx,
        evaluator.clone(),
        config.control_interval,
        config.max_vus,
    );

    let monitor = RunMonitor {
        job_id: job_id.clone(),
        cancel,
        status: status_rx,
        metrics: metrics.clone(),
        evaluator: evaluator.clone(),
    };
    let handle = tokio::spawn(supervise(
        job_id,
        controller.run(),
        evaluator,
        metrics,
        status_tx,
    ));
    Ok(RunHandle { monitor, handle })
}

/// Drive a run to its end and publish the final status, also when the run task panics
async fn supervise<F>(
    job_id: String,
    run: F,
    evaluator: Arc<ThresholdEvaluator>,
    metrics: Arc<Metrics>,
    status_tx: watch::Sender<JobStatus>,
) -> Result<RunOutcome, RunError>
where
    F: Future<Output = Result<RunOutcome, RunError>> + Send + 'static,
{
    status_tx.send_replace(JobStatus::InProgress);
    let result = match tokio::spawn(run).await {
        Ok(result) => result,
        Err(e) => Err(RunError::Internal(e.to_string())),
    };
    let status = match &result {
        Ok(RunOutcome::Completed) => {
            if evaluator.evaluate(&metrics.snapshot()).overall_pass {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            }
        }
        Ok(RunOutcome::Stopped) => JobStatus::Stopped,
        Ok(RunOutcome::Aborted) => JobStatus::Failed,
        Err(e) => {
            error!("[supervise] - [{}] - {}", &job_id, e);
            JobStatus::Error(e.error_code())
        }
    };
    info!("[supervise] - [{}] - finished with {:?}", &job_id, status);
    status_tx.send_replace(status);
    result
}
