use crate::ProfileError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

lazy_static! {
    static ref DURATION_PART: Regex = Regex::new(r"(\d+(?:\.\d+)?)(ms|s|m|h)").unwrap();
}

/// Duration written the way people write it: `"100ms"`, `"30s"`, `"1m30s"`, `"2h"`.
/// A bare number is taken as milliseconds.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "HumanDurationShadowType", into = "u64")]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    pub fn from_millis(millis: u64) -> Self {
        HumanDuration(Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(millis) = u64::from_str(s) {
            return Ok(HumanDuration::from_millis(millis));
        }
        let invalid = || ProfileError::InvalidDuration(s.to_string());
        let mut consumed = 0;
        let mut millis = 0f64;
        for captures in DURATION_PART.captures_iter(s) {
            let (Some(whole), Some(value), Some(unit)) =
                (captures.get(0), captures.get(1), captures.get(2))
            else {
                return Err(invalid());
            };
            //parts have to follow each other without gaps
            if whole.start() != consumed {
                return Err(invalid());
            }
            consumed = whole.end();
            let value = f64::from_str(value.as_str()).map_err(|_| invalid())?;
            millis += match unit.as_str() {
                "ms" => value,
                "s" => value * 1_000f64,
                "m" => value * 60_000f64,
                _ => value * 3_600_000f64,
            };
        }
        if consumed == 0 || consumed != s.len() {
            return Err(invalid());
        }
        Ok(HumanDuration::from_millis(millis.round() as u64))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HumanDurationShadowType {
    Millis(u64),
    Text(String),
}

impl TryFrom<HumanDurationShadowType> for HumanDuration {
    type Error = ProfileError;

    fn try_from(value: HumanDurationShadowType) -> Result<Self, Self::Error> {
        match value {
            HumanDurationShadowType::Millis(millis) => Ok(HumanDuration::from_millis(millis)),
            HumanDurationShadowType::Text(text) => HumanDuration::from_str(&text),
        }
    }
}

impl From<HumanDuration> for u64 {
    fn from(value: HumanDuration) -> Self {
        value.0.as_millis() as u64
    }
}

/// Reach `target` concurrent virtual users by the end of `duration`
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    #[serde(with = "human_duration")]
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

mod human_duration {
    use super::HumanDuration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        HumanDuration(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        HumanDuration::deserialize(deserializer).map(|d| d.0)
    }
}

/// Ordered stages of a run, `t=0` is the start of the run
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(try_from = "Vec<Stage>", into = "Vec<Stage>")]
pub struct ExecutionPlan {
    stages: Vec<Stage>,
}

impl ExecutionPlan {
    pub fn new(stages: Vec<Stage>) -> Result<Self, ProfileError> {
        if stages.is_empty() {
            return Err(ProfileError::EmptyPlan);
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest concurrency the plan asks for
    pub fn max_target(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or_default()
    }
}

impl TryFrom<Vec<Stage>> for ExecutionPlan {
    type Error = ProfileError;

    fn try_from(value: Vec<Stage>) -> Result<Self, Self::Error> {
        ExecutionPlan::new(value)
    }
}

impl From<ExecutionPlan> for Vec<Stage> {
    fn from(value: ExecutionPlan) -> Self {
        value.stages
    }
}
