use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{WorkerDescriptor, WorkerError, WorkerResult};
use crate::tasks::types::Task;

pub const TOKEN_HEADER: &str = "arrebol-worker-token";
const QUEUE_ID_KEY: &str = "queue_id";

/// Pushes task snapshots to the coordinator.
#[async_trait]
pub trait ReportSender: Send + Sync {
    async fn send_report(&self, task: &Task) -> WorkerResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<String>,
    pub queue_id: String,
}

/// HTTP client for the coordinator's worker API.
pub struct Coordinator {
    http: reqwest::Client,
    endpoint: String,
    worker_id: String,
    session: RwLock<Session>,
}

impl Coordinator {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        worker_id: impl Into<String>,
        queue_id: impl Into<String>,
    ) -> Self {
        Coordinator {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            worker_id: worker_id.into(),
            session: RwLock::new(Session {
                token: None,
                queue_id: queue_id.into(),
            }),
        }
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    pub async fn is_subscribed(&self) -> bool {
        self.session.read().await.token.is_some()
    }

    pub async fn invalidate(&self) {
        self.session.write().await.token = None;
    }

    fn tasks_url(&self, queue_id: &str) -> String {
        format!(
            "{}/workers/{}/queues/{}/tasks",
            self.endpoint, self.worker_id, queue_id
        )
    }

    async fn credentials(&self) -> WorkerResult<(String, String)> {
        let session = self.session.read().await;
        let token = session.token.clone().ok_or(WorkerError::NotSubscribed)?;
        Ok((token, session.queue_id.clone()))
    }

    /// Joins the coordinator and stores the token and queue it hands back.
    pub async fn subscribe(&self, descriptor: &WorkerDescriptor) -> WorkerResult<()> {
        let url = format!("{}/workers", self.endpoint);
        info!(url = %url, worker_id = %self.worker_id, "Subscribing to coordinator");

        let response = self.http.post(&url).json(descriptor).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Coordinator {
                status: status.as_u16(),
                body,
            });
        }

        let body: HashMap<String, String> = response.json().await?;
        let token = body
            .get(TOKEN_HEADER)
            .filter(|t| !t.is_empty())
            .cloned()
            .ok_or_else(|| WorkerError::Subscription(format!("response has no {}", TOKEN_HEADER)))?;

        let mut session = self.session.write().await;
        session.token = Some(token);
        if let Some(queue_id) = body.get(QUEUE_ID_KEY).filter(|q| !q.is_empty()) {
            session.queue_id = queue_id.clone();
        }

        info!(worker_id = %self.worker_id, queue_id = %session.queue_id, "Subscribed");
        Ok(())
    }

    /// Asks for the next task. `None` means the queue has nothing for us.
    pub async fn next_task(&self) -> WorkerResult<Option<Task>> {
        let (token, queue_id) = self.credentials().await?;
        let url = self.tasks_url(&queue_id);
        debug!(url = %url, "Polling for task");

        let response = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(worker_id = %self.worker_id, "Token rejected, will resubscribe");
                self.invalidate().await;
                Err(WorkerError::Unauthorized)
            }
            status if status.is_success() => Ok(Some(response.json::<Task>().await?)),
            status => Err(WorkerError::Coordinator {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl ReportSender for Coordinator {
    async fn send_report(&self, task: &Task) -> WorkerResult<()> {
        let (token, queue_id) = self.credentials().await?;
        let url = self.tasks_url(&queue_id);

        let response = self
            .http
            .put(&url)
            .header(TOKEN_HEADER, token)
            .json(task)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate().await;
        }
        if !status.is_success() {
            return Err(WorkerError::Coordinator {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        debug!(
            task_id = %task.id,
            state = ?task.state,
            progress = task.progress,
            "Report delivered"
        );
        Ok(())
    }
}
