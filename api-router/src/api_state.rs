use std::sync::Arc;

use common::{
    catalog::{JsonTestCaseCatalog, TestCaseCatalog},
    dispatch::{celery::CeleryDispatcher, TaskDispatcher},
    error::AppError,
    lifecycle::{JobLifecycle, LifecycleSettings},
    storage::{job_store::JobStore, redis_store::RedisJobStore},
    utils::config::AppConfig,
};
use tracing::info;

#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: Arc<JobLifecycle>,
    pub config: AppConfig,
}

impl ApiState {
    pub async fn new(config: &AppConfig) -> Result<Self, AppError> {
        let store = Arc::new(RedisJobStore::connect(&config.redis_url).await?);
        let catalog = Arc::new(JsonTestCaseCatalog::load(&config.catalog_dir)?);
        let dispatcher =
            Arc::new(CeleryDispatcher::connect(config.broker_url(), &config.dispatch_queue).await?);

        info!(
            quota_mode = ?config.quota_mode,
            max_jobs_per_user = config.max_job_count_per_user,
            queue = %config.dispatch_queue,
            "Job gateway state initialized"
        );

        Ok(Self::with_components(config, store, catalog, dispatcher))
    }

    /// Builds the state around already constructed collaborators.
    pub fn with_components(
        config: &AppConfig,
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn TestCaseCatalog>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        let lifecycle = JobLifecycle::new(
            store,
            catalog,
            dispatcher,
            LifecycleSettings::from_config(config),
        );

        Self {
            lifecycle: Arc::new(lifecycle),
            config: config.clone(),
        }
    }
}
