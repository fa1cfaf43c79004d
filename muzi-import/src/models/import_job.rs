//! Import job identity and lifecycle
//!
//! A job moves through `Pending → Running → {Completed, Failed}`. The
//! progress transport turns the two terminal states into end-of-stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::Platform;

/// Random opaque job token (32 lowercase hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Accepted, unit count not known yet
    Pending,
    /// Processing units
    Running,
    /// Finished successfully
    Completed,
    /// Fatal error or cancellation
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Legal edges of the lifecycle
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Failed)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal job state transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Record of one state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub old_state: JobState,
    pub new_state: JobState,
    pub transitioned_at: DateTime<Utc>,
}

/// Bookkeeping for one in-flight import
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub job_id: JobId,
    pub user_id: i64,
    pub source: Platform,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(user_id: i64, source: Platform) -> Self {
        Self {
            job_id: JobId::generate(),
            user_id,
            source,
            state: JobState::Pending,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `new_state`, refusing edges the lifecycle does not allow
    pub fn transition_to(&mut self, new_state: JobState) -> Result<StateTransition, IllegalTransition> {
        if !self.state.can_transition_to(new_state) {
            return Err(IllegalTransition {
                from: self.state,
                to: new_state,
            });
        }

        let transition = StateTransition {
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }
        Ok(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
