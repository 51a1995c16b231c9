use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NavetteError, Result};

/// Lifecycle of a background job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted and waiting for a worker
    Queued,
    /// A worker is running an attempt
    Running,
    /// Attempt failed transiently, next attempt scheduled
    Retrying,
    /// Handler completed its work
    Succeeded,
    /// Handler found nothing to do (aggregate gone)
    Skipped,
    /// Non-retryable failure
    Failed,
    /// Retries exhausted, parked for an operator
    DeadLettered,
}

impl JobState {
    /// No worker will touch the job again unless it is requeued
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Skipped | Self::Failed | Self::DeadLettered
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Retrying => write!(f, "retrying"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "retrying" => Ok(Self::Retrying),
            "succeeded" => Ok(Self::Succeeded),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            "dead_lettered" => Ok(Self::DeadLettered),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// Events that drive [`JobState`] transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    Start,
    Succeed,
    Skip(String),
    /// Non-retryable failure
    Fail(String),
    /// Transient failure with attempts left
    Retry(String),
    /// Transient failure on the last attempt
    Exhaust(String),
    /// Operator resubmission of a dead-lettered job
    Requeue,
}

impl JobEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Succeed => "succeed",
            Self::Skip(_) => "skip",
            Self::Fail(_) => "fail",
            Self::Retry(_) => "retry",
            Self::Exhaust(_) => "exhaust",
            Self::Requeue => "requeue",
        }
    }

    /// Error or skip reason carried by the event
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Skip(msg) | Self::Fail(msg) | Self::Retry(msg) | Self::Exhaust(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Target state for `event` applied in `current`
pub fn determine_target_state(current: JobState, event: &JobEvent) -> Result<JobState> {
    let target = match (current, event) {
        (JobState::Queued, JobEvent::Start) => JobState::Running,
        (JobState::Retrying, JobEvent::Start) => JobState::Running,

        (JobState::Running, JobEvent::Succeed) => JobState::Succeeded,
        (JobState::Running, JobEvent::Skip(_)) => JobState::Skipped,
        (JobState::Running, JobEvent::Fail(_)) => JobState::Failed,
        (JobState::Running, JobEvent::Retry(_)) => JobState::Retrying,
        (JobState::Running, JobEvent::Exhaust(_)) => JobState::DeadLettered,

        (JobState::DeadLettered, JobEvent::Requeue) => JobState::Queued,

        (from, event) => {
            return Err(NavetteError::Queue(format!(
                "invalid job transition from {from} on {}",
                event.event_type()
            )))
        }
    };

    Ok(target)
}
