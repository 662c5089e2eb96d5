use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Image used when neither the task nor the worker names one.
pub const DEFAULT_IMAGE: &str = "ubuntu";

const DEFAULT_REPORT_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    #[default]
    Pending,
    Running,
    Finished,
    Failed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Finished | State::Failed)
    }
}

/// A unit of work handed out by the coordinator.
///
/// `progress` counts the commands whose exit code has shown up in the
/// ledger so far. It is not a percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(rename = "DockerImage", default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub progress: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<SystemTime>,
}

fn default_report_interval() -> u64 {
    DEFAULT_REPORT_INTERVAL_SECS
}

impl Task {
    pub fn new(id: impl Into<String>, commands: Vec<String>) -> Self {
        Task {
            id: id.into(),
            commands,
            image: None,
            report_interval: DEFAULT_REPORT_INTERVAL_SECS,
            state: State::Pending,
            progress: 0,
            start_time: None,
            finish_time: None,
        }
    }

    /// The task's image, or `default` when the task leaves it unset.
    pub fn image_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.image.as_deref() {
            Some(image) if !image.trim().is_empty() => image,
            _ => default,
        }
    }
}

/// Failures raised by a container driver.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("docker client error: {0}")]
    Client(#[from] bollard::errors::Error),

    #[error("failed to pull image {image}: {message}")]
    Pull { image: String, message: String },

    #[error("command `{command}` exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        stderr: String,
    },

    #[error("exec detached unexpectedly while running `{0}`")]
    Detached(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("container {0} not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DockerResult<T> = Result<T, DockerError>;

/// Failures raised by the task executor, tagged with the lifecycle phase
/// they happened in.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("container setup failed: {0}")]
    Setup(#[source] DockerError),

    #[error("task script transfer failed: {0}")]
    Transfer(#[source] DockerError),

    #[error("task execution failed: {0}")]
    Execution(#[source] DockerError),

    #[error("container teardown failed: {0}")]
    Teardown(#[source] DockerError),

    #[error("progress read failed: {0}")]
    Progress(#[source] DockerError),

    #[error("no container session for this executor")]
    NoContainer,

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: State, to: State },
}

pub type TaskResult<T> = Result<T, TaskError>;
