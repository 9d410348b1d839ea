use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use redis::{aio::MultiplexedConnection, AsyncCommands};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::{DispatchError, TaskDispatcher};

/// Publishes tasks to Celery workers through a Redis broker.
///
/// Messages follow Celery's task protocol v2 with a JSON body and are pushed
/// onto the list Celery's Redis transport consumes for `queue`.
pub struct CeleryDispatcher {
    conn: MultiplexedConnection,
    queue: String,
}

impl CeleryDispatcher {
    pub async fn connect(broker_url: &str, queue: &str) -> Result<Self, DispatchError> {
        let client = redis::Client::open(broker_url)
            .map_err(|e| DispatchError::ConnectionError(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DispatchError::ConnectionError(e.to_string()))?;

        Ok(Self {
            conn,
            queue: queue.to_string(),
        })
    }
}

#[async_trait]
impl TaskDispatcher for CeleryDispatcher {
    async fn send(&self, task_name: &str, args: Vec<Value>) -> Result<(), DispatchError> {
        let task_id = Uuid::new_v4().to_string();
        let message = celery_message(task_name, &task_id, &args, &self.queue)?;

        let mut conn = self.conn.clone();
        conn.lpush::<_, _, u64>(&self.queue, message).await?;

        info!(task_name, %task_id, queue = %self.queue, "Published task");
        Ok(())
    }
}

/// Builds a Celery protocol v2 envelope for `task_name(*args)`.
fn celery_message(
    task_name: &str,
    task_id: &str,
    args: &[Value],
    queue: &str,
) -> Result<String, DispatchError> {
    let embed = json!({ "callbacks": null, "errbacks": null, "chain": null, "chord": null });
    let body = serde_json::to_vec(&json!([args, {}, embed]))
        .map_err(|e| DispatchError::PublishError(format!("Serialization Error: {e}")))?;

    let envelope = json!({
        "body": STANDARD.encode(body),
        "content-encoding": "utf-8",
        "content-type": "application/json",
        "headers": {
            "lang": "py",
            "task": task_name,
            "id": task_id,
            "shadow": null,
            "eta": null,
            "expires": null,
            "group": null,
            "group_index": null,
            "retries": 0,
            "timelimit": [null, null],
            "root_id": task_id,
            "parent_id": null,
            "origin": "judge-gateway",
            "ignore_result": true
        },
        "properties": {
            "correlation_id": task_id,
            "reply_to": "",
            "delivery_mode": 2,
            "delivery_info": { "exchange": "", "routing_key": queue },
            "priority": 0,
            "body_encoding": "base64",
            "delivery_tag": Uuid::new_v4().to_string()
        }
    });

    serde_json::to_string(&envelope)
        .map_err(|e| DispatchError::PublishError(format!("Serialization Error: {e}")))
}
