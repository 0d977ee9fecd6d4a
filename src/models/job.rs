use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a recognition job in the job store.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Complete,
    Failed,
}

/// A recognition job, keyed by the identity carried in queue message bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub identity: String,
    pub resource_url: String,
    pub input_filename: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub status: JobStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(identity: &str, resource_url: &str, input_filename: &str) -> Self {
        Self {
            identity: identity.to_string(),
            resource_url: resource_url.to_string(),
            input_filename: input_filename.to_string(),
            result: None,
            error: None,
            status: JobStatus::Pending,
            completed_at: None,
        }
    }

    pub fn mark_complete(&mut self, result: String, completed_at: DateTime<Utc>) {
        self.result = Some(result);
        self.error = None;
        self.status = JobStatus::Complete;
        self.completed_at = Some(completed_at);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.result = None;
        self.error = Some(error);
        self.status = JobStatus::Failed;
        self.completed_at = None;
    }

    /// Keep the job eligible for another delivery after a side effect failed.
    pub fn mark_retryable(&mut self, result: Option<String>, error: String) {
        self.result = result;
        self.error = Some(error);
        self.status = JobStatus::Pending;
        self.completed_at = None;
    }
}
