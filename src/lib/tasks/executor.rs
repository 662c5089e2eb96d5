//! Drives one task through its container lifecycle.
//!
//! `init` prepares a container with the script runner in `/arrebol`, `send`
//! writes the task's commands as a script, `run` hands the script to the
//! runner and waits for it, and `stop` tears the container down. Progress is
//! observed out of band through the exit-code ledger the runner appends to.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use super::driver::{ContainerConfig, ContainerDriver, Mount};
use super::ledger;
use super::types::{DEFAULT_IMAGE, State, Task, TaskError, TaskResult};

pub const WORK_DIR: &str = "/arrebol";
pub const RUNNER_FILE_NAME: &str = "task-script-executor.sh";
pub const TASK_SCRIPT_FILE_NAME: &str = "task-id.ts";
pub const LEDGER_SUFFIX: &str = ".ec";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Image used for tasks that do not name one.
    pub default_image: String,
    /// Script runner on the worker host, copied into every container.
    pub runner_path: PathBuf,
    pub mounts: Vec<Mount>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            default_image: DEFAULT_IMAGE.to_string(),
            runner_path: PathBuf::from(RUNNER_FILE_NAME),
            mounts: Vec::new(),
        }
    }
}

pub fn script_path() -> String {
    format!("{}/{}", WORK_DIR, TASK_SCRIPT_FILE_NAME)
}

pub fn ledger_path() -> String {
    format!("{}{}", script_path(), LEDGER_SUFFIX)
}

pub fn runner_command() -> String {
    format!(
        "/bin/bash {}/{} -d -tsf={}",
        WORK_DIR,
        RUNNER_FILE_NAME,
        script_path()
    )
}

/// Container name for a task: its id made docker-safe plus a random suffix.
pub fn container_name(task_id: &str) -> String {
    let safe: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let prefix = match safe.trim_start_matches(['-', '.', '_']) {
        "" => "task",
        trimmed => trimmed,
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

pub struct TaskExecutor {
    driver: Arc<dyn ContainerDriver>,
    config: ExecutorConfig,
    container_id: RwLock<Option<String>>,
    final_progress: RwLock<Option<usize>>,
    progress_lock: Mutex<()>,
}

impl TaskExecutor {
    pub fn new(driver: Arc<dyn ContainerDriver>, config: ExecutorConfig) -> Self {
        TaskExecutor {
            driver,
            config,
            container_id: RwLock::new(None),
            final_progress: RwLock::new(None),
            progress_lock: Mutex::new(()),
        }
    }

    pub async fn container_id(&self) -> Option<String> {
        self.container_id.read().await.clone()
    }

    /// Runs the whole lifecycle for `task`.
    ///
    /// Only the outcome of `run` touches `task.state`. Setup and transfer
    /// errors leave it alone and are returned after the container is torn
    /// down. A task that is already terminal is refused before any
    /// container is created.
    pub async fn execute(&self, task: &mut Task) -> TaskResult<()> {
        if task.state.is_terminal() {
            return Err(TaskError::InvalidStateTransition {
                from: task.state,
                to: State::Running,
            });
        }

        let config = ContainerConfig {
            name: container_name(&task.id),
            image: task.image_or(&self.config.default_image).to_string(),
            mounts: self.config.mounts.clone(),
        };

        if let Err(e) = self.init(&task.id, &config).await {
            error!(task_id = %task.id, error = %e, "Container initialization failed");
            self.teardown(&task.id).await;
            return Err(e);
        }

        if let Err(e) = self.send(task).await {
            error!(task_id = %task.id, error = %e, "Sending task script failed");
            self.teardown(&task.id).await;
            return Err(e);
        }

        let outcome = self.run(&task.id).await;
        self.teardown(&task.id).await;

        match outcome {
            Ok(()) => {
                task.transition(State::Finished)?;
                info!(task_id = %task.id, "Task finished");
                Ok(())
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Task execution failed");
                if let Err(te) = task.transition(State::Failed) {
                    warn!(task_id = %task.id, error = %te, "Could not mark task failed");
                }
                Err(e)
            }
        }
    }

    async fn init(&self, task_id: &str, config: &ContainerConfig) -> TaskResult<()> {
        info!(task_id, image = %config.image, "Initializing container");

        if !self.driver.image_exists(&config.image).await {
            self.driver
                .pull_image(&config.image)
                .await
                .map_err(TaskError::Setup)?;
        }

        let container_id = self
            .driver
            .create_container(config)
            .await
            .map_err(TaskError::Setup)?;
        *self.container_id.write().await = Some(container_id.clone());
        *self.final_progress.write().await = None;

        self.driver
            .start_container(&container_id)
            .await
            .map_err(TaskError::Setup)?;

        self.driver
            .exec(&container_id, &format!("mkdir -p {}", WORK_DIR))
            .await
            .map_err(TaskError::Setup)?;

        self.driver
            .copy_file(&container_id, &self.config.runner_path, WORK_DIR)
            .await
            .map_err(TaskError::Setup)?;

        info!(task_id, container_id = %container_id, "Container ready");
        Ok(())
    }

    async fn send(&self, task: &Task) -> TaskResult<()> {
        let container_id = self.container_id().await.ok_or(TaskError::NoContainer)?;
        info!(
            task_id = %task.id,
            container_id = %container_id,
            commands = task.commands.len(),
            "Sending task script"
        );

        // an empty task still hands the runner an (empty) script
        self.driver
            .exec(&container_id, &format!("touch {}", script_path()))
            .await
            .map_err(TaskError::Transfer)?;

        self.driver
            .write_file(&container_id, &task.commands, &script_path())
            .await
            .map_err(TaskError::Transfer)
    }

    async fn run(&self, task_id: &str) -> TaskResult<()> {
        let container_id = self.container_id().await.ok_or(TaskError::NoContainer)?;
        info!(task_id, container_id = %container_id, "Running task script");

        self.driver
            .exec(&container_id, &runner_command())
            .await
            .map_err(TaskError::Execution)
    }

    /// Stops then removes the container. Removal is attempted even when the
    /// stop fails; both errors are reported. Safe to call repeatedly.
    pub async fn stop(&self) -> TaskResult<()> {
        let Some(container_id) = self.container_id.write().await.take() else {
            return Ok(());
        };

        let stopped = self.driver.stop_container(&container_id).await;
        if let Err(e) = &stopped {
            warn!(container_id = %container_id, error = %e, "Failed to stop container");
        }

        let removed = self.driver.remove_container(&container_id).await;
        if let Err(e) = &removed {
            warn!(container_id = %container_id, error = %e, "Failed to remove container");
        }

        stopped.and(removed).map_err(TaskError::Teardown)
    }

    /// Takes a last ledger reading, then stops the container. Errors are
    /// logged only.
    async fn teardown(&self, task_id: &str) {
        if self.container_id().await.is_some() {
            match self.progress().await {
                Ok(progress) => *self.final_progress.write().await = Some(progress),
                Err(e) => warn!(task_id, error = %e, "Final progress read failed"),
            }
        }

        if let Err(e) = self.stop().await {
            warn!(task_id, error = %e, "Container teardown failed, resources may leak");
        }
    }

    /// Number of commands the runner has completed so far.
    ///
    /// Once the container is gone this returns the reading taken just before
    /// teardown.
    pub async fn progress(&self) -> TaskResult<usize> {
        let _guard = self.progress_lock.lock().await;

        let Some(container_id) = self.container_id().await else {
            return (*self.final_progress.read().await).ok_or(TaskError::NoContainer);
        };

        let ledger = ledger_path();
        if let Err(e) = self
            .driver
            .exec(&container_id, &format!("touch {}", ledger))
            .await
        {
            warn!(container_id = %container_id, error = %e, "Failed to touch ledger");
        }

        let raw = self
            .driver
            .read_file(&container_id, &ledger)
            .await
            .map_err(TaskError::Progress)?;

        Ok(ledger::completed_commands(&raw))
    }
}
