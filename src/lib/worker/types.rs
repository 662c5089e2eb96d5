use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::WorkerConfig;
use super::coordinator::Coordinator;
use super::worker::ExecutionController;
use crate::tasks::types::DockerError;

/// A worker agent: one coordinator session and one task at a time.
pub struct Worker {
    pub config: WorkerConfig,
    pub coordinator: Arc<Coordinator>,
    pub controller: ExecutionController,
    pub task_count: u64,
}

/// What the worker tells the coordinator about itself when joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkerDescriptor {
    pub id: String,
    pub vcpu: String,
    pub ram: String,
    pub image: String,
    pub address: String,
    pub queue_id: String,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("coordinator answered {status}: {body}")]
    Coordinator { status: u16, body: String },

    #[error("coordinator rejected the worker token")]
    Unauthorized,

    #[error("worker has not joined the coordinator")]
    NotSubscribed,

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("docker error: {0}")]
    Docker(#[from] DockerError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
