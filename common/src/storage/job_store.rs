use async_trait::async_trait;
use thiserror::Error;

use super::types::job::{Job, JobUpdate};

/// Represents errors that can occur while talking to the job store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    ConnectionError(String),

    #[error("Store command error: {0}")]
    CommandError(String),

    #[error("Corrupt job record: {0}")]
    CorruptRecord(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            StoreError::ConnectionError(err.to_string())
        } else {
            StoreError::CommandError(err.to_string())
        }
    }
}

/// Result of [`JobStore::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No job with that id exists (or it has expired).
    NotFound,
    /// The job exists but the mutation did not take effect.
    NotApplied,
    Applied,
}

impl UpdateOutcome {
    /// The `-1 / 0 / 1` code reported by the store scripts.
    pub fn as_code(self) -> i64 {
        match self {
            UpdateOutcome::NotFound => -1,
            UpdateOutcome::NotApplied => 0,
            UpdateOutcome::Applied => 1,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            c if c < 0 => UpdateOutcome::NotFound,
            0 => UpdateOutcome::NotApplied,
            _ => UpdateOutcome::Applied,
        }
    }
}

/// Result of [`JobStore::save_within_quota`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CappedSave {
    /// Stored; the count is the number of elements written. Zero means nothing was stored.
    Saved(u64),
    /// The user already holds `active` live jobs, at or above the cap.
    QuotaExceeded { active: u64 },
}

/// Keyed, TTL-backed storage for judgment jobs with a per-user index.
///
/// The per-user index is only a hint: every read re-validates index entries
/// against the job records and drops those whose record has expired.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Stores the job with the given TTL and adds it to the user's index.
    ///
    /// Returns the number of elements written; `0` means the save did not happen.
    async fn save(&self, user_id: i64, job: &Job, ttl_secs: u64) -> Result<u64, StoreError>;

    /// Stores the job only if the user holds fewer than `max_jobs` live jobs.
    ///
    /// Pruning, counting and inserting happen as one atomic step.
    async fn save_within_quota(
        &self,
        user_id: i64,
        job: &Job,
        ttl_secs: u64,
        max_jobs: u64,
    ) -> Result<CappedSave, StoreError>;

    /// All live jobs indexed for the user, oldest first.
    async fn find_by_user_id(&self, user_id: i64) -> Result<Vec<Job>, StoreError>;

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    async fn find_by_user_id_and_job_id(
        &self,
        user_id: i64,
        job_id: &str,
    ) -> Result<Option<Job>, StoreError>;

    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<UpdateOutcome, StoreError>;

    /// Removes the job and its index entry. Returns `0` when there was nothing to delete.
    async fn delete(&self, job_id: &str) -> Result<u64, StoreError>;

    /// Round-trips to the backing engine.
    async fn ping(&self) -> Result<(), StoreError>;
}
