mod endpoint_specs;
mod presets;
mod stage_spec;

pub use endpoint_specs::{EndpointSet, EndpointSpec};
pub use presets::Preset;
pub use stage_spec::{ExecutionPlan, HumanDuration, Stage};

use anyhow::Error as AnyError;
use common_types::JobStatus;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::io::Error as StdIoError;
use surge_metrics::default_histogram_bucket;
use surge_thresholds::{ThresholdError, Thresholds};
use url::Url;

/// Problems found while loading a profile, before anything runs
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile has no endpoint")]
    NoEndpoints,
    #[error("all endpoint weights are zero")]
    AllWeightsZero,
    #[error("invalid weight {weight} for endpoint {template}")]
    InvalidWeight { template: String, weight: f64 },
    #[error("invalid endpoint template: {0}")]
    InvalidTemplate(String),
    #[error("profile has no stage")]
    EmptyPlan,
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    HTTP,
    //Unsupported
    // HTTPS
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Scheme,
}

impl Target {
    /// Build a target from a base url like `http://app:8080`
    pub fn from_base_url(base_url: &str) -> Result<Self, ProfileError> {
        let url =
            Url::parse(base_url).map_err(|e| ProfileError::InvalidTarget(format!("{base_url}, {e}")))?;
        if url.scheme() != "http" {
            return Err(ProfileError::InvalidTarget(format!(
                "{}, only http is supported",
                base_url
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ProfileError::InvalidTarget(format!("{}, no host", base_url)))?;
        Ok(Target {
            host: host.to_string(),
            port: url.port_or_known_default().unwrap_or(80),
            protocol: Scheme::HTTP,
        })
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", &self.host, self.port)
    }
}

/// Describe a load test: who to hit, with how many virtual users over time, and what makes the
/// run a pass.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: Option<String>,
    pub target: Target,
    pub stages: ExecutionPlan,
    pub endpoints: EndpointSet,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Overrides the process wide default request timeout
    pub request_timeout: Option<HumanDuration>,
    /// Overrides the process wide default delay between iterations
    pub pacing: Option<HumanDuration>,
    /// Status counted as a passed check
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    #[serde(default = "default_histogram_bucket")]
    pub histogram_buckets: SmallVec<[f64; 6]>,
}

fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum JobStatusQueryParams {
    JobId { job_id: String },
    PagerOptions { offset: usize, limit: usize },
}

impl Display for JobStatusQueryParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JobStatusQueryParams::JobId { job_id } => write!(f, "job_id={}", job_id),
            JobStatusQueryParams::PagerOptions { offset, limit } => {
                write!(f, "offset={}&limit={}", offset, limit)
            }
        }
    }
}

impl TryFrom<HashMap<String, String>> for JobStatusQueryParams {
    type Error = GenericError;

    fn try_from(mut value: HashMap<String, String>) -> Result<Self, Self::Error> {
        let params = match value.remove("job_id") {
            Some(job_id) => JobStatusQueryParams::JobId { job_id },
            None => {
                let offset = parse_param(&mut value, "offset", 0)?;
                let limit = parse_param(&mut value, "limit", 20)?;
                if limit < 1 {
                    return Err(GenericError::new("limit can't be less than 1", 400));
                }
                JobStatusQueryParams::PagerOptions { offset, limit }
            }
        };
        //everything known is removed by now
        if value.is_empty() {
            Ok(params)
        } else {
            Err(GenericError::new("Invalid or too many query params", 400))
        }
    }
}

fn parse_param(
    params: &mut HashMap<String, String>,
    name: &str,
    default: usize,
) -> Result<usize, GenericError> {
    match params.remove(name) {
        None => Ok(default),
        Some(v) => v
            .parse::<usize>()
            .map_err(|e| GenericError::new(&format!("Invalid {} {}, {}", name, &v, e), 400)),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenericResponse<T: Serialize> {
    #[serde(flatten)]
    pub data: HashMap<String, T>,
}

impl<T: Serialize> Default for GenericResponse<T> {
    fn default() -> Self {
        GenericResponse {
            data: HashMap::with_capacity(2),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenericError {
    pub error_code: u16,
    pub message: String,
    #[serde(flatten)]
    pub data: HashMap<String, String>,
}

impl GenericError {
    pub fn internal_500(msg: &str) -> GenericError {
        Self::new(msg, 500)
    }

    pub fn new(msg: &str, code: u16) -> Self {
        Self {
            error_code: code,
            message: msg.to_string(),
            ..Default::default()
        }
    }

    pub fn from_error<E: StdError>(code: u16, err: E) -> GenericError {
        Self::new(&err.to_string(), code)
    }
}

impl From<ProfileError> for GenericError {
    fn from(e: ProfileError) -> Self {
        Self::from_error(400, e)
    }
}

impl From<ThresholdError> for GenericError {
    fn from(e: ThresholdError) -> Self {
        Self::from_error(400, e)
    }
}

macro_rules! from_error {
    ($t:ty) => {
        impl From<$t> for GenericError {
            fn from(e: $t) -> Self {
                GenericError::internal_500(&e.to_string())
            }
        }
    };
}

from_error!(hyper::Error);
from_error!(AnyError);
from_error!(serde_json::Error);
from_error!(StdIoError);

impl Default for GenericError {
    fn default() -> Self {
        GenericError {
            error_code: u16::MAX,
            message: String::new(),
            data: HashMap::new(),
        }
    }
}

impl Display for GenericError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.error_code, self.message)
    }
}

impl StdError for GenericError {}
