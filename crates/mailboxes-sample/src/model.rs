//! Requests submitted to the job service and the reports it hands back.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Type-safe identifier for jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job_{}", self.0)
    }
}

/// A unit of work for the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    /// Lane to run in. Jobs without a lane run after every configured lane.
    #[serde(default)]
    pub lane: Option<String>,
    pub work_units: u32,
    /// Simulated I/O the job waits on before it starts working.
    #[serde(default)]
    pub wait_ms: u64,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, work_units: u32) -> Self {
        Self {
            name: name.into(),
            lane: None,
            work_units,
            wait_ms: 0,
        }
    }

    pub fn in_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    pub fn after_ms(mut self, wait_ms: u64) -> Self {
        self.wait_ms = wait_ms;
        self
    }
}

/// Outcome of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: JobId,
    pub name: String,
    pub lane: Option<String>,
    /// Completion position across the whole service, starting at 0.
    pub position: u64,
    /// Mailbox turns the job needed, waits included.
    pub turns: u32,
    pub checksum: u64,
}
