use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::source_code::MAX_SOURCE_BYTES;

/// How the per-user job quota is enforced on create.
#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QuotaMode {
    /// Count and insert in one server-side step; the limit is never exceeded.
    #[default]
    Atomic,
    /// Count first, then insert. Concurrent creates for one user may overshoot.
    Soft,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub http_port: u16,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default)]
    pub broker_url: Option<String>,
    pub api_secret_key: String,
    #[serde(default = "default_max_job_count_per_user")]
    pub max_job_count_per_user: usize,
    #[serde(default = "default_job_ttl_multiplier")]
    pub job_ttl_multiplier: f64,
    #[serde(default)]
    pub quota_mode: QuotaMode,
    #[serde(default = "default_scope_jobs_to_user")]
    pub scope_jobs_to_user: bool,
    #[serde(default = "default_catalog_dir")]
    pub catalog_dir: String,
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: String,
    #[serde(default = "default_dispatch_task_name")]
    pub dispatch_task_name: String,
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    #[serde(default = "default_request_max_body_bytes")]
    pub request_max_body_bytes: usize,
}

impl AppConfig {
    /// The task-queue broker; shares the job store's Redis unless configured separately.
    pub fn broker_url(&self) -> &str {
        self.broker_url.as_deref().unwrap_or(&self.redis_url)
    }

    /// Rejects settings the workers cannot honour.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_source_bytes == 0 || self.max_source_bytes > MAX_SOURCE_BYTES {
            return Err(ConfigError::Message(format!(
                "max_source_bytes must be between 1 and {MAX_SOURCE_BYTES}, got {}",
                self.max_source_bytes
            )));
        }
        if self.max_job_count_per_user == 0 {
            return Err(ConfigError::Message(
                "max_job_count_per_user must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: 0,
            redis_url: default_redis_url(),
            broker_url: None,
            api_secret_key: String::new(),
            max_job_count_per_user: default_max_job_count_per_user(),
            job_ttl_multiplier: default_job_ttl_multiplier(),
            quota_mode: QuotaMode::default(),
            scope_jobs_to_user: default_scope_jobs_to_user(),
            catalog_dir: default_catalog_dir(),
            dispatch_queue: default_dispatch_queue(),
            dispatch_task_name: default_dispatch_task_name(),
            max_source_bytes: default_max_source_bytes(),
            request_max_body_bytes: default_request_max_body_bytes(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_max_job_count_per_user() -> usize {
    2
}

fn default_job_ttl_multiplier() -> f64 {
    2.0
}

fn default_scope_jobs_to_user() -> bool {
    true
}

fn default_catalog_dir() -> String {
    "./data/test_cases".to_string()
}

fn default_dispatch_queue() -> String {
    "celery".to_string()
}

fn default_dispatch_task_name() -> String {
    "worker.tasks.execute_code".to_string()
}

fn default_max_source_bytes() -> usize {
    MAX_SOURCE_BYTES
}

fn default_request_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize::<AppConfig>()?.validate()
}
