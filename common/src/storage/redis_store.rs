use std::collections::HashMap;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Script};
use tracing::{debug, warn};

use super::{
    job_store::{CappedSave, JobStore, StoreError, UpdateOutcome},
    types::job::{Job, JobUpdate},
};

const JOB_KEY_PREFIX: &str = "judge:job:";
const USER_KEY_PREFIX: &str = "judge:user:";
const USER_KEY_SUFFIX: &str = ":jobs";

// KEYS: job, index. ARGV: ttl, job_id, field/value pairs...
const SAVE_SCRIPT: &str = r"
local added = redis.call('HSET', KEYS[1], unpack(ARGV, 3))
redis.call('EXPIRE', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
if redis.call('TTL', KEYS[2]) < tonumber(ARGV[1]) then
  redis.call('EXPIRE', KEYS[2], ARGV[1])
end
return added
";

// KEYS: job, index. ARGV: ttl, job_id, max_jobs, job key prefix, field/value pairs...
// Returns {1, added} when stored, {0, active} when the user is at the cap.
const SAVE_CAPPED_SCRIPT: &str = r"
local active = 0
for _, id in ipairs(redis.call('SMEMBERS', KEYS[2])) do
  if redis.call('EXISTS', ARGV[4] .. id) == 1 then
    active = active + 1
  else
    redis.call('SREM', KEYS[2], id)
  end
end
if active >= tonumber(ARGV[3]) then
  return {0, active}
end
local added = redis.call('HSET', KEYS[1], unpack(ARGV, 5))
redis.call('EXPIRE', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
if redis.call('TTL', KEYS[2]) < tonumber(ARGV[1]) then
  redis.call('EXPIRE', KEYS[2], ARGV[1])
end
return {1, added}
";

// KEYS: job. ARGV: field/value pairs. Keeps the record's TTL.
const UPDATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
if #ARGV == 0 then
  return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
for i = 1, #ARGV, 2 do
  if redis.call('HGET', KEYS[1], ARGV[i]) ~= ARGV[i + 1] then
    return 0
  end
end
return 1
";

// KEYS: job. ARGV: user key prefix, user key suffix, job_id.
const DELETE_SCRIPT: &str = r"
local owner = redis.call('HGET', KEYS[1], 'user_id')
local removed = redis.call('DEL', KEYS[1])
if owner then
  redis.call('SREM', ARGV[1] .. owner .. ARGV[2], ARGV[3])
end
return removed
";

fn job_key(job_id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{job_id}")
}

fn user_index_key(user_id: i64) -> String {
    format!("{USER_KEY_PREFIX}{user_id}{USER_KEY_SUFFIX}")
}

/// Redis-backed [`JobStore`].
///
/// Each job is a hash with its own `EXPIRE`; each user has a set of job ids
/// whose TTL is stretched to cover the longest-lived job it references.
/// Multi-key mutations run as Lua scripts so they are atomic on the server.
/// The scripts build index keys from ARGV, so the store expects a single
/// Redis node rather than a cluster.
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    save_script: Script,
    save_capped_script: Script,
    update_script: Script,
    delete_script: Script,
}

impl RedisJobStore {
    /// Opens a multiplexed connection to the Redis server at `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            conn,
            save_script: Script::new(SAVE_SCRIPT),
            save_capped_script: Script::new(SAVE_CAPPED_SCRIPT),
            update_script: Script::new(UPDATE_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        })
    }

    fn parse_record(fields: &HashMap<String, String>) -> Result<Option<Job>, StoreError> {
        if fields.is_empty() {
            return Ok(None);
        }
        Job::from_fields(fields).map(Some)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn save(&self, user_id: i64, job: &Job, ttl_secs: u64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.save_script.key(job_key(&job.job_id));
        invocation
            .key(user_index_key(user_id))
            .arg(ttl_secs)
            .arg(&job.job_id);
        for (field, value) in job.to_fields() {
            invocation.arg(field).arg(value);
        }

        let added: u64 = invocation.invoke_async(&mut conn).await?;
        debug!(user_id, job_id = %job.job_id, ttl_secs, added, "saved job");
        Ok(added)
    }

    async fn save_within_quota(
        &self,
        user_id: i64,
        job: &Job,
        ttl_secs: u64,
        max_jobs: u64,
    ) -> Result<CappedSave, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.save_capped_script.key(job_key(&job.job_id));
        invocation
            .key(user_index_key(user_id))
            .arg(ttl_secs)
            .arg(&job.job_id)
            .arg(max_jobs)
            .arg(JOB_KEY_PREFIX);
        for (field, value) in job.to_fields() {
            invocation.arg(field).arg(value);
        }

        let (stored, count): (i64, u64) = invocation.invoke_async(&mut conn).await?;
        if stored == 1 {
            debug!(user_id, job_id = %job.job_id, ttl_secs, added = count, "saved job within quota");
            Ok(CappedSave::Saved(count))
        } else {
            Ok(CappedSave::QuotaExceeded { active: count })
        }
    }

    async fn find_by_user_id(&self, user_id: i64) -> Result<Vec<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let index_key = user_index_key(user_id);
        let job_ids: Vec<String> = conn.smembers(&index_key).await?;
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for job_id in &job_ids {
            pipe.hgetall(job_key(job_id));
        }
        let records: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut jobs = Vec::with_capacity(records.len());
        let mut expired = Vec::new();
        for (job_id, record) in job_ids.into_iter().zip(records) {
            match Self::parse_record(&record)? {
                Some(job) => jobs.push(job),
                None => expired.push(job_id),
            }
        }

        if !expired.is_empty() {
            debug!(user_id, count = expired.len(), "pruning expired jobs from user index");
            if let Err(e) = conn.srem::<_, _, u64>(&index_key, &expired).await {
                // The next read retries the prune; the jobs are already filtered out.
                warn!(user_id, error = %e, "failed to prune user index");
            }
        }

        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let record: HashMap<String, String> = conn.hgetall(job_key(job_id)).await?;
        Self::parse_record(&record)
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
        let mut conn = self.conn.clone();
        let mut invocation = self.update_script.key(job_key(job_id));
        for (field, value) in update.to_fields() {
            invocation.arg(field).arg(value);
        }

        let code: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(UpdateOutcome::from_code(code))
    }

    async fn delete(&self, job_id: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = self
            .delete_script
            .key(job_key(job_id))
            .arg(USER_KEY_PREFIX)
            .arg(USER_KEY_SUFFIX)
            .arg(job_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
