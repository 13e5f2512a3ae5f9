//! In-memory registry of asynchronous jobs.

use super::models::{JobKind, JobPayload, JobRecord, JobStatus, JobUpdate};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Illegal transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Concurrency-safe map of job id to [`JobRecord`].
///
/// Readers (status polling) share the lock; every write is exclusive. No
/// operation performs I/O while holding it.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a new Pending job and returns a copy of it.
    ///
    /// The record is fully built before it is inserted, so readers never
    /// observe a partially initialized job.
    pub fn create(&self, owner: &str, kind: JobKind, payload: JobPayload) -> JobRecord {
        let now = chrono::Utc::now().timestamp();
        let mut jobs = self.write();

        let mut id = uuid::Uuid::new_v4().to_string();
        while jobs.contains_key(&id) {
            id = uuid::Uuid::new_v4().to_string();
        }

        let record = JobRecord::new(id.clone(), owner, kind, payload, now);
        jobs.insert(id, record.clone());
        drop(jobs);

        info!("Created job {} of type {} for user {}", record.id, kind, owner);
        record
    }

    pub fn get(&self, id: &str) -> Result<JobRecord, JobStoreError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))
    }

    /// Applies a status change to an existing job.
    ///
    /// Updates that would move backwards or leave a terminal state are
    /// rejected and leave the record untouched.
    pub fn transition(&self, id: &str, update: JobUpdate) -> Result<JobRecord, JobStoreError> {
        let now = chrono::Utc::now().timestamp();
        let mut jobs = self.write();
        let record = jobs
            .get_mut(id)
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        let to = update.target_status();
        if !record.status.can_transition_to(to) {
            return Err(JobStoreError::IllegalTransition {
                id: id.to_string(),
                from: record.status,
                to,
            });
        }

        record.apply(update, now);
        debug!("Job {} is now {}", id, to);
        Ok(record.clone())
    }

    /// Removes every job created more than `max_age` ago, whatever its status.
    pub fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_at(chrono::Utc::now().timestamp(), max_age)
    }

    pub(crate) fn sweep_at(&self, now: i64, max_age: Duration) -> usize {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(max_age);
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, job| job.created_at >= cutoff);
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, id: &str, created_at: i64) {
        if let Some(job) = self.write().get_mut(id) {
            job.created_at = created_at;
        }
    }
}
