//! Common environment variables uses by various components

use once_cell::sync::OnceCell;
use std::env;
use std::str::FromStr;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .map_err(|_| ())
        .and_then(|val| T::from_str(&val).map_err(|_| ()))
        .unwrap_or(default)
}

static CONTROL_INTERVAL_MS: OnceCell<u64> = OnceCell::new();
pub const ENV_NAME_CONTROL_INTERVAL: &str = "CONTROL_INTERVAL_MS";
pub const DEFAULT_CONTROL_INTERVAL_MS: u64 = 1_000;
/// How often the controller samples the ramp and reconciles virtual users, at least 1ms
pub fn control_interval_ms() -> u64 {
    *CONTROL_INTERVAL_MS.get_or_init(|| {
        env_or(ENV_NAME_CONTROL_INTERVAL, DEFAULT_CONTROL_INTERVAL_MS).max(1)
    })
}

static REQUEST_TIMEOUT_MS: OnceCell<u64> = OnceCell::new();
pub const ENV_NAME_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT_MS";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub fn request_timeout_ms() -> u64 {
    *REQUEST_TIMEOUT_MS
        .get_or_init(|| env_or(ENV_NAME_REQUEST_TIMEOUT, DEFAULT_REQUEST_TIMEOUT_MS))
}

static PACING_DELAY_MS: OnceCell<u64> = OnceCell::new();
pub const ENV_NAME_PACING_DELAY: &str = "PACING_DELAY_MS";
pub const DEFAULT_PACING_DELAY_MS: u64 = 100;
/// Think time between two iterations of the same virtual user
pub fn pacing_delay_ms() -> u64 {
    *PACING_DELAY_MS.get_or_init(|| env_or(ENV_NAME_PACING_DELAY, DEFAULT_PACING_DELAY_MS))
}

static MAX_VUS: OnceCell<u32> = OnceCell::new();
pub const ENV_NAME_MAX_VUS: &str = "MAX_VUS";
pub const DEFAULT_MAX_VUS: u32 = 1_000;
pub fn max_vus() -> u32 {
    *MAX_VUS.get_or_init(|| env_or(ENV_NAME_MAX_VUS, DEFAULT_MAX_VUS))
}

static JOB_RETENTION_SECS: OnceCell<u64> = OnceCell::new();
pub const ENV_NAME_JOB_RETENTION: &str = "JOB_RETENTION_SECS";
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 600;
/// How long a finished job stays queryable before it is pruned
pub fn job_retention_secs() -> u64 {
    *JOB_RETENTION_SECS
        .get_or_init(|| env_or(ENV_NAME_JOB_RETENTION, DEFAULT_JOB_RETENTION_SECS))
}

static HTTP_PORT: OnceCell<u16> = OnceCell::new();
pub const ENV_NAME_HTTP_PORT: &str = "HTTP_ENDPOINT_PORT";
pub const DEFAULT_HTTP_PORT: u16 = 3030;
pub fn http_port() -> u16 {
    *HTTP_PORT.get_or_init(|| env_or(ENV_NAME_HTTP_PORT, DEFAULT_HTTP_PORT))
}

pub const ENV_NAME_APP_URL: &str = "APP_URL";
pub const DEFAULT_APP_URL: &str = "http://app:8080";
/// Base url of the application under test, used by the preset profiles
pub fn app_url() -> String {
    env::var(ENV_NAME_APP_URL).unwrap_or_else(|_| DEFAULT_APP_URL.to_string())
}
