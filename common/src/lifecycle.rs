use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::{
    catalog::TestCaseCatalog,
    dispatch::TaskDispatcher,
    error::AppError,
    storage::{
        job_store::{CappedSave, JobStore, UpdateOutcome},
        types::job::{CodeLanguage, Job, JobUpdate},
    },
    utils::{
        config::{AppConfig, QuotaMode},
        source_code::{decode_source_code, MAX_SOURCE_BYTES},
    },
};

/// Business rules applied by [`JobLifecycle`].
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub max_jobs_per_user: usize,
    /// Safety factor applied to the worst-case run time when deriving a job's TTL.
    pub ttl_multiplier: f64,
    pub quota_mode: QuotaMode,
    pub task_name: String,
    /// Decoded submission size limit, never above [`MAX_SOURCE_BYTES`].
    pub max_source_bytes: usize,
}

impl LifecycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_jobs_per_user: config.max_job_count_per_user,
            ttl_multiplier: config.job_ttl_multiplier,
            quota_mode: config.quota_mode,
            task_name: config.dispatch_task_name.clone(),
            max_source_bytes: config.max_source_bytes.min(MAX_SOURCE_BYTES),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// A create request as submitted.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: i64,
    pub challenge_id: i64,
    pub code_language: CodeLanguage,
    /// Base64 encoded source file.
    pub code: String,
}

/// Seconds a job may live: every test case at its full time limit, times the
/// safety multiplier, rounded because the store only accepts whole seconds.
/// Never less than one second.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn job_ttl_secs(time_limit_secs: f64, total_test_cases: u32, multiplier: f64) -> u64 {
    let ttl = (time_limit_secs * f64::from(total_test_cases) * multiplier).round();
    if ttl.is_finite() && ttl >= 1.0 {
        ttl as u64
    } else {
        1
    }
}

/// Create, execute, cancel, delete and look up judgment jobs.
#[derive(Clone)]
pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn TestCaseCatalog>,
    dispatcher: Arc<dyn TaskDispatcher>,
    settings: LifecycleSettings,
}

impl JobLifecycle {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn TestCaseCatalog>,
        dispatcher: Arc<dyn TaskDispatcher>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            dispatcher,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Creates a job for the user, enforcing the per-user quota.
    ///
    /// An unknown challenge is reported before the submission is decoded; the
    /// submission is validated before any job is built.
    pub async fn create(&self, request: NewJob) -> Result<Job, AppError> {
        let NewJob {
            user_id,
            challenge_id,
            code_language,
            code,
        } = request;

        let total_test_cases = self
            .catalog
            .test_case_count(challenge_id)
            .filter(|count| *count > 0)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No test cases found for the provided 'challengeId'={challenge_id}"
                ))
            })?;
        let time_limit = self
            .catalog
            .time_limit(challenge_id, code_language)
            .ok_or_else(|| {
                AppError::InternalError(format!(
                    "No time limit configured for challengeId={challenge_id}"
                ))
            })?;
        let source_code = decode_source_code(&code, self.settings.max_source_bytes)?;

        let job = Job::new(
            user_id,
            challenge_id,
            code_language,
            source_code,
            total_test_cases,
        )?;
        let ttl_secs = job_ttl_secs(time_limit, total_test_cases, self.settings.ttl_multiplier);
        let max_jobs = self.settings.max_jobs_per_user;

        let written = match self.settings.quota_mode {
            QuotaMode::Atomic => {
                match self
                    .store
                    .save_within_quota(user_id, &job, ttl_secs, max_jobs as u64)
                    .await?
                {
                    CappedSave::Saved(written) => written,
                    CappedSave::QuotaExceeded { active } => {
                        warn!(user_id, active, max_jobs, "Job quota exceeded");
                        return Err(quota_exceeded(max_jobs, user_id));
                    }
                }
            }
            QuotaMode::Soft => {
                let active = self.store.find_by_user_id(user_id).await?;
                if active.len() >= max_jobs {
                    warn!(user_id, active = active.len(), max_jobs, "Job quota exceeded");
                    return Err(quota_exceeded(max_jobs, user_id));
                }
                self.store.save(user_id, &job, ttl_secs).await?
            }
        };

        if written == 0 {
            error!(user_id, job_id = %job.job_id, "Job store reported no write for new job");
            return Err(AppError::InternalError("Job was not saved".to_string()));
        }

        info!(
            user_id,
            challenge_id,
            job_id = %job.job_id,
            language = %code_language,
            total_test_cases,
            ttl_secs,
            "Created judgment job"
        );
        Ok(job)
    }

    /// Hands the job to the worker pool and returns its test-case count.
    ///
    /// Does not wait for a verdict. The dispatcher is called exactly once when
    /// the job exists and never when it does not.
    pub async fn execute(&self, job_id: &str, user_id: Option<i64>) -> Result<u32, AppError> {
        let job = self
            .lookup(job_id, user_id)
            .await?
            .ok_or_else(|| job_not_found(job_id, user_id))?;

        let record = serde_json::to_value(&job)
            .map_err(|e| AppError::InternalError(format!("Failed to serialize job: {e}")))?;
        self.dispatcher
            .send(&self.settings.task_name, vec![json!(job.user_id), record])
            .await?;

        info!(user_id = job.user_id, %job_id, "Dispatched judgment job");
        Ok(job.total_test_cases)
    }

    /// Raises the job's stop flag so the worker stops at its next checkpoint.
    ///
    /// Cancelling an already-cancelled job succeeds again.
    pub async fn cancel(&self, job_id: &str, user_id: Option<i64>) -> Result<(), AppError> {
        self.ensure_owned(job_id, user_id).await?;

        match self.store.update(job_id, JobUpdate::stop()).await? {
            UpdateOutcome::NotFound => Err(job_not_found(job_id, user_id)),
            UpdateOutcome::NotApplied => {
                error!(%job_id, "Job store reported no effect for stop flag update");
                Err(AppError::InternalError("Job was not updated".to_string()))
            }
            UpdateOutcome::Applied => {
                info!(%job_id, "Stop requested for judgment job");
                Ok(())
            }
        }
    }

    pub async fn delete(&self, job_id: &str, user_id: Option<i64>) -> Result<(), AppError> {
        self.ensure_owned(job_id, user_id).await?;

        if self.store.delete(job_id).await? == 0 {
            return Err(job_not_found(job_id, user_id));
        }
        info!(%job_id, "Deleted judgment job");
        Ok(())
    }

    pub async fn exists(&self, job_id: &str, user_id: Option<i64>) -> Result<bool, AppError> {
        Ok(self.lookup(job_id, user_id).await?.is_some())
    }

    /// The user's live jobs, oldest first.
    pub async fn active_jobs(&self, user_id: i64) -> Result<Vec<Job>, AppError> {
        Ok(self.store.find_by_user_id(user_id).await?)
    }

    /// How many more jobs the user may create, given `active` live jobs.
    pub fn remaining_quota(&self, active: usize) -> usize {
        self.settings.max_jobs_per_user.saturating_sub(active)
    }

    async fn lookup(&self, job_id: &str, user_id: Option<i64>) -> Result<Option<Job>, AppError> {
        let job = match user_id {
            Some(user_id) => {
                self.store
                    .find_by_user_id_and_job_id(user_id, job_id)
                    .await?
            }
            None => self.store.find_by_job_id(job_id).await?,
        };
        if job.is_none() {
            debug!(%job_id, ?user_id, "Job lookup missed");
        }
        Ok(job)
    }

    async fn ensure_owned(&self, job_id: &str, user_id: Option<i64>) -> Result<(), AppError> {
        if user_id.is_some() && self.lookup(job_id, user_id).await?.is_none() {
            return Err(job_not_found(job_id, user_id));
        }
        Ok(())
    }
}

fn job_not_found(job_id: &str, user_id: Option<i64>) -> AppError {
    match user_id {
        Some(user_id) => AppError::NotFound(format!(
            "Job not found for user_id={user_id} with job_id={job_id}"
        )),
        None => AppError::NotFound(format!("Job not found for jobId={job_id}")),
    }
}

fn quota_exceeded(max_jobs: usize, user_id: i64) -> AppError {
    AppError::QuotaExceeded(format!(
        "Max job count={max_jobs} exceeded for userId:{user_id}"
    ))
}
