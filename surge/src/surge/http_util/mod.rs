use crate::{JobRegistry, JobReport};
use common_types::JobStatus;
use log::{error, trace};
use std::collections::HashMap;
use std::str::FromStr;
use surge_http::{
    GenericError, GenericResponse, JobStatusQueryParams, Preset, Profile, TestJobResponse,
};

pub async fn handle_request(
    profile: Profile,
    registry: &JobRegistry,
) -> Result<TestJobResponse, GenericError> {
    trace!("[handle_request] - {:?}", &profile);
    let job_id = registry.submit(profile).await?;
    Ok(TestJobResponse {
        job_id,
        status: JobStatus::Starting,
    })
}

/// Start one of the built-in profiles against `base_url`
pub async fn handle_preset(
    name: &str,
    base_url: &str,
    registry: &JobRegistry,
) -> Result<TestJobResponse, GenericError> {
    let preset = Preset::from_str(name)
        .map_err(|_| GenericError::new(&format!("Unknown preset: {}", name), 404))?;
    let profile = preset.profile(base_url)?;
    handle_request(profile, registry).await
}

pub async fn handle_history_all(
    params: JobStatusQueryParams,
    registry: &JobRegistry,
) -> Result<GenericResponse<JobStatus>, GenericError> {
    let status = match params {
        JobStatusQueryParams::JobId { job_id } => registry.job_status(&job_id).await,
        JobStatusQueryParams::PagerOptions { offset, limit } => {
            registry.all_status(offset, limit).await
        }
    };
    Ok(GenericResponse { data: status })
}

pub async fn stop(
    job_id: String,
    registry: &JobRegistry,
) -> Result<GenericResponse<String>, GenericError> {
    let msg = match registry.stop(&job_id).await {
        Some(JobStatus::Starting | JobStatus::InProgress) => "Job stopped",
        Some(JobStatus::Stopped) => "Job already stopped",
        Some(JobStatus::Completed) => "Job already completed",
        Some(JobStatus::Failed) => "Job failed",
        Some(JobStatus::Error(code)) => {
            error!("[stop] - [{}] - job ended with error {:?}", &job_id, code);
            "Job ended with error"
        }
        None => return Err(GenericError::new("Job Not Found", 404)),
    };
    let mut data = HashMap::with_capacity(1);
    data.insert(job_id, msg.to_string());
    Ok(GenericResponse { data })
}

pub async fn verdict(job_id: String, registry: &JobRegistry) -> Result<JobReport, GenericError> {
    registry
        .report(&job_id)
        .await
        .ok_or_else(|| GenericError::new("Job Not Found", 404))
}
