//! Built-in profiles for the application under test

use crate::{EndpointSet, ExecutionPlan, HumanDuration, Profile, ProfileError, Stage, Target};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};
use surge_metrics::default_histogram_bucket;
use surge_thresholds::{Threshold, Thresholds};

const SMOKE_ENDPOINTS: [&str; 4] = [
    "/actuator/health",
    "/api/cpu-intensive?iterations=200000",
    "/api/memory-intensive?sizeMb=50",
    "/api/database-intensive?ops=200",
];

const STRESS_ENDPOINTS: [&str; 4] = [
    "/api/cpu-intensive?iterations=500000",
    "/api/memory-intensive?sizeMb=100",
    "/api/database-intensive?ops=500",
    "/api/combined-stress?durationSec=5",
];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// A few users for half a minute, checks that everything is alive
    Smoke,
    /// Staged ramp up to 100 users over ten minutes
    Stress,
}

impl Preset {
    pub fn profile(&self, base_url: &str) -> Result<Profile, ProfileError> {
        let target = Target::from_base_url(base_url)?;
        match self {
            Preset::Smoke => Ok(Profile {
                name: Some("smoke".to_string()),
                target,
                // constant 3 users: jump to 3 at t=0, hold for 30s
                stages: ExecutionPlan::new(vec![
                    Stage::new(Duration::ZERO, 3),
                    Stage::new(Duration::from_secs(30), 3),
                ])?,
                endpoints: EndpointSet::uniform(&SMOKE_ENDPOINTS)?,
                thresholds: Thresholds::default(),
                request_timeout: None,
                pacing: Some(HumanDuration::from_millis(200)),
                expected_status: 200,
                histogram_buckets: default_histogram_bucket(),
            }),
            Preset::Stress => Ok(Profile {
                name: Some("stress".to_string()),
                target,
                stages: ExecutionPlan::new(vec![
                    Stage::new(Duration::from_secs(60), 10),
                    Stage::new(Duration::from_secs(120), 30),
                    Stage::new(Duration::from_secs(180), 60),
                    Stage::new(Duration::from_secs(120), 100),
                    Stage::new(Duration::from_secs(120), 0),
                ])?,
                endpoints: EndpointSet::uniform(&STRESS_ENDPOINTS)?,
                thresholds: Thresholds::new(vec![
                    Threshold::parse("http_req_failed", "rate<0.01")?,
                    Threshold::parse("http_req_duration", "p(95)<2000")?,
                ])?,
                request_timeout: Some(HumanDuration::from_millis(30_000)),
                pacing: Some(HumanDuration::from_millis(100)),
                expected_status: 200,
                histogram_buckets: default_histogram_bucket(),
            }),
        }
    }
}
