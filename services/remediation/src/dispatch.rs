//! Task dispatch to the worker pool
//!
//! [`HttpWorkerPool`] posts tasks directly; [`RelayTaskDispatcher`] defers
//! them onto a relay as `task.dispatch` messages. Both report every outcome
//! as a [`DispatchResult`] and never return errors to the engine.
//!
//! Deferred tasks reach the pool when the relay is flushed: the router
//! delivers them to a [`WorkerPoolEndpoint`] which performs the same POST.

use crate::error::DispatchError;
use crate::types::{DispatchResult, Task, TaskPriority};
use async_trait::async_trait;
use message_router::{EndpointHandler, HandlerError, Message};
use relays::RelayRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Error bodies are cut to this many characters
pub const ERROR_BODY_LIMIT: usize = 200;

/// Message type used for relay-deferred tasks
pub const TASK_DISPATCH_TYPE: &str = "task.dispatch";

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, task: &Task) -> DispatchResult;
}

#[derive(Serialize)]
struct TaskEnvelope<'a> {
    task: &'a Task,
}

#[derive(Deserialize)]
struct RelayedTask {
    task: Task,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerPoolReply {
    squad_id: Option<String>,
}

/// Posts tasks to `{base}/tasks`
#[derive(Debug, Clone)]
pub struct HttpWorkerPool {
    client: reqwest::Client,
    tasks_url: String,
}

impl HttpWorkerPool {
    pub fn new(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            tasks_url: format!("{}/tasks", base.trim_end_matches('/')),
        }
    }

    pub fn with_timeout(base: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client, base))
    }

    pub fn tasks_url(&self) -> &str {
        &self.tasks_url
    }

    async fn submit(&self, task: &Task) -> Result<Option<String>, DispatchError> {
        let response = self
            .client
            .post(&self.tasks_url)
            .json(&TaskEnvelope { task })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DispatchError::Http {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        // A 2xx without a parsable body still counts as dispatched
        let reply: WorkerPoolReply = serde_json::from_str(&body).unwrap_or_default();
        Ok(reply.squad_id)
    }
}

#[async_trait]
impl TaskDispatcher for HttpWorkerPool {
    fn name(&self) -> &str {
        "worker-pool"
    }

    async fn dispatch(&self, task: &Task) -> DispatchResult {
        match self.submit(task).await {
            Ok(squad_id) => {
                debug!("Dispatched {} to squad {:?}", task.task_type, squad_id);
                DispatchResult::dispatched(task.clone(), squad_id)
            }
            Err(e) => {
                warn!("Failed to dispatch {}: {}", task.task_type, e);
                DispatchResult::failed(task.clone(), e.to_string())
            }
        }
    }
}

/// Router endpoint that submits relayed `task.dispatch` messages to the pool
#[derive(Debug, Clone)]
pub struct WorkerPoolEndpoint {
    pool: HttpWorkerPool,
}

impl WorkerPoolEndpoint {
    pub fn new(pool: HttpWorkerPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EndpointHandler for WorkerPoolEndpoint {
    async fn handle(&self, message: &Message) -> Result<Value, HandlerError> {
        let relayed: RelayedTask = serde_json::from_value(message.payload().clone())
            .map_err(|e| HandlerError::new(format!("invalid task envelope: {}", e)))?;
        let task = relayed.task;

        let squad_id = self
            .pool
            .submit(&task)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;
        debug!(
            "Relayed {} reached the worker pool (squad {:?})",
            task.task_type, squad_id
        );
        Ok(json!({ "squadId": squad_id }))
    }
}

/// Enqueues tasks on a relay for deferred delivery
#[derive(Debug, Clone)]
pub struct RelayTaskDispatcher {
    relays: Arc<RelayRegistry>,
    relay_id: String,
}

impl RelayTaskDispatcher {
    pub fn new(relays: Arc<RelayRegistry>, relay_id: impl Into<String>) -> Self {
        Self {
            relays,
            relay_id: relay_id.into(),
        }
    }

    fn enqueue(&self, task: &Task) -> Result<(), DispatchError> {
        let payload = serde_json::to_value(TaskEnvelope { task })?;
        let mut message = Message::new(TASK_DISPATCH_TYPE, payload);
        if matches!(
            task.priority,
            Some(TaskPriority::High | TaskPriority::Critical)
        ) {
            message = message.with_metadata("priority", "high");
        }
        self.relays.enqueue(&self.relay_id, message)?;
        Ok(())
    }
}

#[async_trait]
impl TaskDispatcher for RelayTaskDispatcher {
    fn name(&self) -> &str {
        "relay"
    }

    async fn dispatch(&self, task: &Task) -> DispatchResult {
        match self.enqueue(task) {
            Ok(()) => DispatchResult::queued(task.clone()),
            Err(e) => {
                warn!(
                    "Relay {} rejected {}: {}",
                    self.relay_id, task.task_type, e
                );
                DispatchResult::failed(task.clone(), e.to_string())
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DispatchStatus, TaskStatus};
    use mockito::Matcher;
    use relays::{Lane, RelayDefinition, RelayOptions};

    fn task() -> Task {
        Task::new("process.revive", TaskStatus::Pending)
            .with_payload("process", "relay")
            .with_priority(TaskPriority::Critical)
    }

    #[tokio::test]
    async fn test_dispatched_with_squad_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/workers/tasks")
            .match_body(Matcher::PartialJson(json!({
                "task": {"type": "process.revive", "status": "pending"}
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"squadId":"squad-7"}"#)
            .create_async()
            .await;

        let pool = HttpWorkerPool::with_timeout(
            &format!("{}/api/workers/", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        let result = pool.dispatch(&task()).await;

        mock.assert_async().await;
        assert_eq!(result.status, DispatchStatus::Dispatched);
        assert_eq!(result.squad_id.as_deref(), Some("squad-7"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_http_error_body_truncated() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/tasks")
            .with_status(503)
            .with_body("x".repeat(500))
            .create_async()
            .await;

        let pool = HttpWorkerPool::with_timeout(&server.url(), Duration::from_secs(5)).unwrap();
        let result = pool.dispatch(&task()).await;

        assert_eq!(result.status, DispatchStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error, format!("HTTP 503: {}", "x".repeat(200)));
    }

    #[tokio::test]
    async fn test_network_failure() {
        let pool =
            HttpWorkerPool::with_timeout("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let result = pool.dispatch(&task()).await;

        assert_eq!(result.status, DispatchStatus::Failed);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_relay_dispatch_queues_and_flags_priority() {
        let relays = Arc::new(RelayRegistry::new());
        relays
            .register(
                RelayDefinition::new("tasks", "ops"),
                RelayOptions::default(),
            )
            .unwrap();
        let dispatcher = RelayTaskDispatcher::new(relays.clone(), "tasks");

        let result = dispatcher.dispatch(&task()).await;

        assert_eq!(result.status, DispatchStatus::Queued);
        let buffered = relays.buffered_messages("tasks").unwrap();
        assert_eq!(buffered.len(), 1);
        let message = &buffered[0].message;
        assert_eq!(message.message_type(), TASK_DISPATCH_TYPE);
        assert_eq!(message.payload()["task"]["type"], "process.revive");
        assert_eq!(relays::classify(message), Lane::FastTrack);
    }

    #[tokio::test]
    async fn test_relay_dispatch_failure() {
        let dispatcher = RelayTaskDispatcher::new(Arc::new(RelayRegistry::new()), "missing");
        let result = dispatcher.dispatch(&task()).await;

        assert_eq!(result.status, DispatchStatus::Failed);
        assert!(result.error.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_worker_pool_endpoint_submits_relayed_task() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tasks")
            .match_body(Matcher::PartialJson(json!({
                "task": {"type": "process.revive", "payload": {"process": "relay"}}
            })))
            .with_status(200)
            .with_body(r#"{"squadId":"squad-3"}"#)
            .expect(1)
            .create_async()
            .await;

        let pool = HttpWorkerPool::with_timeout(&server.url(), Duration::from_secs(5)).unwrap();
        let endpoint = WorkerPoolEndpoint::new(pool);
        let message = Message::new(
            TASK_DISPATCH_TYPE,
            serde_json::to_value(TaskEnvelope { task: &task() }).unwrap(),
        );

        let reply = endpoint.handle(&message).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply["squadId"], "squad-3");
    }

    #[tokio::test]
    async fn test_worker_pool_endpoint_rejects_malformed_payload() {
        let pool = HttpWorkerPool::with_timeout("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let endpoint = WorkerPoolEndpoint::new(pool);
        let message = Message::new(TASK_DISPATCH_TYPE, json!({"task": "revive"}));

        let error = endpoint.handle(&message).await.unwrap_err();
        assert!(error.0.starts_with("invalid task envelope"));
    }
}
