//! # Service Configuration
//!
//! [`ServiceConfig`] names the mailbox and lists the lanes, highest priority first. A lane's
//! position in the list is its context key, so lanes are ordered by the mailbox's natural
//! key order and jobs without a lane run last.
//!
//! The struct derives `serde` traits so a host application can embed it in its own config
//! file. The sample binary reads it from the environment:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `JOBS_MAILBOX` | mailbox name used in logs | `jobs` |
//! | `JOBS_LANES` | comma-separated lane names | `urgent,normal,bulk` |
//! | `JOBS_CHUNK_UNITS` | work units per turn | `4` |

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub mailbox_name: String,
    /// Lane names, highest priority first.
    pub lanes: Vec<String>,
    /// Work units a job processes before yielding its turn.
    pub chunk_units: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mailbox_name: "jobs".to_string(),
            lanes: vec!["urgent".into(), "normal".into(), "bulk".into()],
            chunk_units: 4,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, JobError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from `lookup`, falling back to the defaults for missing variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, JobError> {
        let mut config = Self::default();
        if let Some(name) = lookup("JOBS_MAILBOX") {
            config.mailbox_name = name;
        }
        if let Some(lanes) = lookup("JOBS_LANES") {
            config.lanes = lanes
                .split(',')
                .map(str::trim)
                .filter(|lane| !lane.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(chunk) = lookup("JOBS_CHUNK_UNITS") {
            config.chunk_units = chunk
                .trim()
                .parse()
                .map_err(|_| JobError::InvalidConfig(format!("JOBS_CHUNK_UNITS={chunk}")))?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.chunk_units == 0 {
            return Err(JobError::InvalidConfig(
                "chunk_units must be at least 1".into(),
            ));
        }
        let mut seen = HashSet::new();
        for lane in &self.lanes {
            if !seen.insert(lane.as_str()) {
                return Err(JobError::InvalidConfig(format!("duplicate lane {lane}")));
            }
        }
        Ok(())
    }

    /// Context key of `lane`: its position in [`ServiceConfig::lanes`].
    pub fn rank(&self, lane: &str) -> Option<usize> {
        self.lanes.iter().position(|l| l == lane)
    }
}
