//! `Job` and `JobStatus` — the queue-level work item and its UI-visible
//! completion state.

use crate::types::RequestId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

/// Why a job was enqueued, mirroring the smart-gate priority ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Scheduled,
    OperatorCommand,
    EmergencyShutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_key: String,
    pub equipment_id: String,
    pub location_id: String,
    pub job_type: JobType,
    pub priority: i32,
    pub reason: String,
    pub attempts: u32,
    pub state: JobState,
    /// Correlation id of whichever batch or single-equipment cron pass
    /// enqueued this job, if any (absent for jobs enqueued by an
    /// equipment's own ticker outside a request context).
    #[serde(default)]
    pub request_id: Option<RequestId>,
}

impl Job {
    pub fn new(
        job_key: impl Into<String>,
        equipment_id: impl Into<String>,
        location_id: impl Into<String>,
        job_type: JobType,
        priority: i32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            job_key: job_key.into(),
            equipment_id: equipment_id.into(),
            location_id: location_id.into(),
            job_type,
            priority,
            reason: reason.into(),
            attempts: 0,
            state: JobState::Waiting,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatusValue {
    Waiting,
    Active,
    Completed,
    Failed,
}

/// Operator-polled job status, held in C2 with a ~5 min TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: JobStatusValue,
    pub message: Option<String>,
    pub progress: Option<f32>,
    pub result: Option<serde_json::Value>,
}

impl JobStatus {
    pub fn waiting(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatusValue::Waiting,
            message: None,
            progress: None,
            result: None,
        }
    }

    pub fn completed(job_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatusValue::Completed,
            message: None,
            progress: Some(1.0),
            result: Some(result),
        }
    }

    pub fn failed(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatusValue::Failed,
            message: Some(message.into()),
            progress: None,
            result: None,
        }
    }
}
