use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod celery;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Broker connection error: {0}")]
    ConnectionError(String),

    #[error("Publish error: {0}")]
    PublishError(String),
}

impl From<redis::RedisError> for DispatchError {
    fn from(err: redis::RedisError) -> Self {
        DispatchError::PublishError(err.to_string())
    }
}

/// Hands a task to the external worker pool.
///
/// Sending is fire-and-forget: the call returns once the broker has accepted
/// the message and never waits for the task to run. Implementations do not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn send(&self, task_name: &str, args: Vec<Value>) -> Result<(), DispatchError>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use recording::RecordingDispatcher;

#[cfg(any(test, feature = "test-utils"))]
mod recording {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Mutex;

    use super::{DispatchError, TaskDispatcher};

    /// Dispatcher that keeps every sent task in memory.
    #[derive(Default)]
    pub struct RecordingDispatcher {
        sent: Mutex<Vec<(String, Vec<Value>)>>,
        fail: AtomicBool,
    }

    impl RecordingDispatcher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every subsequent send fail as if the broker were down.
        pub fn fail_sends(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        pub async fn sent(&self) -> Vec<(String, Vec<Value>)> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl TaskDispatcher for RecordingDispatcher {
        async fn send(&self, task_name: &str, args: Vec<Value>) -> Result<(), DispatchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::ConnectionError("broker unavailable".into()));
            }
            self.sent.lock().await.push((task_name.to_string(), args));
            Ok(())
        }
    }
}
