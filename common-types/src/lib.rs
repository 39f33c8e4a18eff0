//! Define common types uses by various components of surge

use serde::{Deserialize, Serialize};

/// Lifecycle of a single virtual user.
///
/// A user is created `Idle`, becomes `Running` once its iteration loop starts and stays there
/// until the controller marks it `Draining`. A draining user finishes the iteration it's in
/// (request + pacing delay) and then moves to `Stopped`. A stopped user is never reused.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl From<u8> for VuState {
    fn from(value: u8) -> Self {
        match value {
            0 => VuState::Idle,
            1 => VuState::Running,
            2 => VuState::Draining,
            _ => VuState::Stopped,
        }
    }
}

/// Status of a test job, as reported by the job service
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Starting,
    InProgress,
    Stopped,
    Completed,
    /// Run finished, but at least one threshold failed
    Failed,
    Error(ErrorCode),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Starting | JobStatus::InProgress)
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidProfile,
    InvalidThreshold,
    ResourceExhausted,
    Others,
}
