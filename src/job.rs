//! Job phase and record types shared by the registry and the wire layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a tracked analysis job.
///
/// Only non-terminal phases exist here: a job that completes or fails is
/// removed from the registry rather than stored in a terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Waiting for a worker slot
    Queued,
    /// Analysis in progress
    Running,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
        }
    }
}

/// An in-flight analysis job, keyed by customer.
///
/// Presence of a record means "as far as this client knows, the customer
/// has an unfinished analysis job."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub customer_id: String,
    /// Display name; refreshed opportunistically, not authoritative
    #[serde(default)]
    pub customer_name: String,
    /// Identifies the underlying job instance
    #[serde(default)]
    pub task_id: String,
    pub phase: JobPhase,
    /// When this client last observed a signal for the job
    pub observed_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        customer_id: impl Into<String>,
        customer_name: impl Into<String>,
        task_id: impl Into<String>,
        phase: JobPhase,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            customer_name: customer_name.into(),
            task_id: task_id.into(),
            phase,
            observed_at: Utc::now(),
        }
    }
}
