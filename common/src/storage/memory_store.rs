use std::collections::HashMap;

use async_trait::async_trait;
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};

use super::{
    job_store::{CappedSave, JobStore, StoreError, UpdateOutcome},
    types::job::{Job, JobUpdate},
};

/// Deadline used when a TTL does not fit the clock; roughly thirty years out.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

struct StoredJob {
    job: Job,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<String, StoredJob>,
    index: HashMap<i64, Vec<String>>,
}

impl MemoryState {
    /// Drops job records past their deadline. Index entries are left behind,
    /// the same way Redis expires a hash without touching the sets that name it.
    fn expire(&mut self, now: Instant) {
        self.jobs.retain(|_, stored| stored.expires_at > now);
    }

    fn prune_index(&mut self, user_id: i64) -> usize {
        let jobs = &self.jobs;
        let Some(ids) = self.index.get_mut(&user_id) else {
            return 0;
        };
        ids.retain(|id| jobs.contains_key(id));
        let live = ids.len();
        if live == 0 {
            self.index.remove(&user_id);
        }
        live
    }

    fn insert(&mut self, user_id: i64, job: &Job, ttl_secs: u64, now: Instant) -> u64 {
        let expires_at = now
            .checked_add(Duration::from_secs(ttl_secs))
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        let written = if self.jobs.contains_key(&job.job_id) {
            0
        } else {
            job.to_fields().len() as u64
        };
        self.jobs.insert(
            job.job_id.clone(),
            StoredJob {
                job: job.clone(),
                expires_at,
            },
        );
        let ids = self.index.entry(user_id).or_default();
        if !ids.contains(&job.job_id) {
            ids.push(job.job_id.clone());
        }
        written
    }
}

/// In-process [`JobStore`] with lazy, clock-driven expiry.
///
/// Deadlines use `tokio::time`, so tests can pause and advance the clock.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, user_id: i64, job: &Job, ttl_secs: u64) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.expire(now);
        Ok(state.insert(user_id, job, ttl_secs, now))
    }

    async fn save_within_quota(
        &self,
        user_id: i64,
        job: &Job,
        ttl_secs: u64,
        max_jobs: u64,
    ) -> Result<CappedSave, StoreError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.expire(now);
        let active = state.prune_index(user_id) as u64;
        if active >= max_jobs {
            return Ok(CappedSave::QuotaExceeded { active });
        }
        Ok(CappedSave::Saved(state.insert(user_id, job, ttl_secs, now)))
    }

    async fn find_by_user_id(&self, user_id: i64) -> Result<Vec<Job>, StoreError> {
        let mut state = self.state.lock().await;
        state.expire(Instant::now());
        state.prune_index(user_id);

        let mut jobs: Vec<Job> = state
            .index
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.jobs.get(id).map(|stored| stored.job.clone()))
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let mut state = self.state.lock().await;
        state.expire(Instant::now());
        Ok(state.jobs.get(job_id).map(|stored| stored.job.clone()))
    }

    async fn find_by_user_id_and_job_id(
        &self,
        user_id: i64,
        job_id: &str,
    ) -> Result<Option<Job>, StoreError> {
        Ok(self
            .find_by_job_id(job_id)
            .await?
            .filter(|job| job.user_id == user_id))
    }

    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<UpdateOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.expire(Instant::now());
        let Some(stored) = state.jobs.get_mut(job_id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if update.is_empty() {
            return Ok(UpdateOutcome::NotApplied);
        }
        update.apply(&mut stored.job);
        Ok(UpdateOutcome::Applied)
    }

    async fn delete(&self, job_id: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.expire(Instant::now());
        let Some(stored) = state.jobs.remove(job_id) else {
            return Ok(0);
        };
        state.prune_index(stored.job.user_id);
        Ok(1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::job::CodeLanguage;

    fn job_for(user_id: i64) -> Job {
        Job::new(user_id, 1, CodeLanguage::Python3, "print(1)".into(), 5).expect("job")
    }

    #[tokio::test]
    async fn save_then_lookup() {
        let store = MemoryJobStore::new();
        let job = job_for(1);

        let written = store.save(1, &job, 30).await.expect("save");
        assert_eq!(written, 9);

        let by_id = store.find_by_job_id(&job.job_id).await.expect("find");
        assert_eq!(by_id.as_ref(), Some(&job));

        let scoped = store
            .find_by_user_id_and_job_id(1, &job.job_id)
            .await
            .expect("scoped");
        assert_eq!(scoped.as_ref(), Some(&job));

        let other_user = store
            .find_by_user_id_and_job_id(2, &job.job_id)
            .await
            .expect("other user");
        assert!(other_user.is_none());
    }

    #[tokio::test]
    async fn saving_the_same_job_twice_writes_nothing_new() {
        let store = MemoryJobStore::new();
        let job = job_for(1);
        store.save(1, &job, 30).await.expect("save");
        assert_eq!(store.save(1, &job, 30).await.expect("resave"), 0);
        assert_eq!(store.find_by_user_id(1).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn find_by_user_id_is_ordered_oldest_first() {
        let store = MemoryJobStore::new();
        let mut older = job_for(3);
        older.created_at -= chrono::Duration::seconds(10);
        let newer = job_for(3);

        store.save(3, &newer, 30).await.expect("save newer");
        store.save(3, &older, 30).await.expect("save older");

        let ids: Vec<String> = store
            .find_by_user_id(3)
            .await
            .expect("list")
            .into_iter()
            .map(|job| job.job_id)
            .collect();
        assert_eq!(ids, vec![older.job_id, newer.job_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_jobs_are_unreachable_and_pruned_from_index() {
        let store = MemoryJobStore::new();
        let short = job_for(4);
        let long = job_for(4);
        store.save(4, &short, 10).await.expect("save short");
        store.save(4, &long, 60).await.expect("save long");

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.find_by_job_id(&short.job_id).await.expect("find").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.find_by_job_id(&short.job_id).await.expect("find").is_none());

        let remaining = store.find_by_user_id(4).await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.first().map(|j| j.job_id.as_str()), Some(long.job_id.as_str()));

        let state = store.state.lock().await;
        assert_eq!(state.index.get(&4).map(Vec::len), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_counts_only_live_jobs() {
        let store = MemoryJobStore::new();
        let first = job_for(5);
        let second = job_for(5);
        let third = job_for(5);

        assert_eq!(
            store.save_within_quota(5, &first, 10, 2).await.expect("first"),
            CappedSave::Saved(9)
        );
        assert_eq!(
            store.save_within_quota(5, &second, 60, 2).await.expect("second"),
            CappedSave::Saved(9)
        );
        assert_eq!(
            store.save_within_quota(5, &third, 60, 2).await.expect("third"),
            CappedSave::QuotaExceeded { active: 2 }
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(
            store.save_within_quota(5, &third, 60, 2).await.expect("after expiry"),
            CappedSave::Saved(9)
        );
    }

    #[tokio::test]
    async fn concurrent_capped_saves_never_exceed_the_cap() {
        let store = std::sync::Arc::new(MemoryJobStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save_within_quota(6, &job_for(6), 30, 2)
                        .await
                        .expect("capped save")
                })
            })
            .collect();

        let mut saved = 0;
        for handle in handles {
            if matches!(handle.await.expect("join"), CappedSave::Saved(_)) {
                saved += 1;
            }
        }
        assert_eq!(saved, 2);
        assert_eq!(store.find_by_user_id(6).await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn huge_ttl_does_not_overflow_the_clock() {
        let store = MemoryJobStore::new();
        let job = job_for(9);

        assert_eq!(store.save(9, &job, u64::MAX).await.expect("save"), 9);
        assert!(store.find_by_job_id(&job.job_id).await.expect("find").is_some());
        assert_eq!(
            store
                .save_within_quota(9, &job_for(9), u64::MAX, 2)
                .await
                .expect("capped"),
            CappedSave::Saved(9)
        );
    }

    #[tokio::test]
    async fn update_three_way_outcome() {
        let store = MemoryJobStore::new();
        let job = job_for(7);
        store.save(7, &job, 30).await.expect("save");

        assert_eq!(
            store.update("missing", JobUpdate::stop()).await.expect("missing"),
            UpdateOutcome::NotFound
        );
        assert_eq!(
            store.update(&job.job_id, JobUpdate::default()).await.expect("empty"),
            UpdateOutcome::NotApplied
        );
        assert_eq!(
            store.update(&job.job_id, JobUpdate::stop()).await.expect("stop"),
            UpdateOutcome::Applied
        );
        let stored = store.find_by_job_id(&job.job_id).await.expect("find");
        assert!(stored.is_some_and(|job| job.stop_flag));
    }

    #[tokio::test]
    async fn delete_removes_record_and_index_entry() {
        let store = MemoryJobStore::new();
        let job = job_for(8);
        store.save(8, &job, 30).await.expect("save");

        assert_eq!(store.delete(&job.job_id).await.expect("delete"), 1);
        assert_eq!(store.delete(&job.job_id).await.expect("delete again"), 0);
        assert!(store.find_by_user_id(8).await.expect("list").is_empty());
        assert!(!store.state.lock().await.index.contains_key(&8));
        assert_eq!(
            store.save_within_quota(8, &job_for(8), 30, 1).await.expect("capped"),
            CappedSave::Saved(9)
        );
    }
}
