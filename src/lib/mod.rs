//! Worker agent for the arrebol task queue.
//!
//! A worker joins a coordinator, pulls tasks, runs each one inside its own
//! container, and reports progress back while the task runs.

pub mod tasks;
pub mod worker;

pub use tasks::docker::DockerClient;
pub use tasks::driver::{ContainerConfig, ContainerDriver, Mount};
pub use tasks::executor::{ExecutorConfig, TaskExecutor};
pub use tasks::types::{DockerError, State, Task, TaskError};
pub use worker::config::WorkerConfig;
pub use worker::coordinator::{Coordinator, ReportSender};
pub use worker::types::{Worker, WorkerError};
pub use worker::worker::ExecutionController;
