use crate::images::Image;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Input data captured when a job is created. Never modified afterwards.
pub type JobPayload = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Inpaint,
    Generate,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Inpaint => "inpaint",
            JobKind::Generate => "generate",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the job lifecycle.
    ///
    /// Pending may go to Processing, or straight to Failed when preparation
    /// breaks before the work starts. Processing may only end. Terminal
    /// states accept nothing.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status change requested by the task driving a job.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Processing,
    Completed(Image),
    Failed(String),
}

impl JobUpdate {
    pub fn target_status(&self) -> JobStatus {
        match self {
            JobUpdate::Processing => JobStatus::Processing,
            JobUpdate::Completed(_) => JobStatus::Completed,
            JobUpdate::Failed(_) => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    #[serde(rename = "userId")]
    pub owner: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Image>,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(rename = "data")]
    pub payload: JobPayload,
}

impl JobRecord {
    pub(super) fn new(id: String, owner: &str, kind: JobKind, payload: JobPayload, now: i64) -> Self {
        Self {
            id,
            owner: owner.to_string(),
            kind,
            status: JobStatus::Pending,
            result: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            payload,
        }
    }

    pub(super) fn apply(&mut self, update: JobUpdate, now: i64) {
        self.status = update.target_status();
        match update {
            JobUpdate::Processing => {}
            JobUpdate::Completed(image) => self.result = Some(image),
            JobUpdate::Failed(reason) => self.failure_reason = Some(reason),
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_edges() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Processing));
        for terminal in [Completed, Failed] {
            for next in [Pending, Processing, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn pending_record_omits_outcome_fields() {
        let record = JobRecord::new("j1".into(), "u1", JobKind::Inpaint, JobPayload::new(), 100);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["status"], "pending");
        assert_eq!(value["type"], "inpaint");
        assert_eq!(value["userId"], "u1");
        assert!(value.get("result").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failed_record_serializes_error() {
        let mut record = JobRecord::new("j1".into(), "u1", JobKind::Inpaint, JobPayload::new(), 100);
        record.apply(JobUpdate::Failed("boom".into()), 150);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "boom");
        assert_eq!(value["updatedAt"], 150);
        assert_eq!(value["createdAt"], 100);
    }
}
