use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::config::WorkerConfig;
use super::coordinator::{Coordinator, ReportSender};
use super::types::{Worker, WorkerError, WorkerResult};
use crate::tasks::{
    driver::ContainerDriver,
    executor::{ExecutorConfig, TaskExecutor},
    types::{State, Task},
};

/// Runs a task on its own executor while reporting on a fixed cadence.
///
/// Each report waits on whichever comes first: the report interval or the
/// executor's terminal state. Completion wins a tie, and nothing is reported
/// after the final report.
pub struct ExecutionController {
    driver: Arc<dyn ContainerDriver>,
    config: ExecutorConfig,
    reporter: Arc<dyn ReportSender>,
}

impl ExecutionController {
    pub fn new(
        driver: Arc<dyn ContainerDriver>,
        config: ExecutorConfig,
        reporter: Arc<dyn ReportSender>,
    ) -> Self {
        ExecutionController {
            driver,
            config,
            reporter,
        }
    }

    /// Drives `task` to a terminal state and returns it. Executor failures
    /// become `Failed`; nothing escapes this call.
    pub async fn process(&self, task: &mut Task) -> State {
        match task.state {
            State::Pending => {
                if let Err(e) = task.transition(State::Running) {
                    error!(task_id = %task.id, error = %e, "Cannot dispatch task");
                    return task.state;
                }
            }
            State::Running => {}
            state => {
                warn!(task_id = %task.id, state = ?state, "Task already terminal, skipping");
                return state;
            }
        }
        task.start_time = Some(SystemTime::now());
        info!(task_id = %task.id, commands = task.commands.len(), "Dispatching task");

        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&self.driver),
            self.config.clone(),
        ));

        let (tx, mut completion) = oneshot::channel::<State>();
        {
            let executor = Arc::clone(&executor);
            let mut running = task.clone();
            tokio::spawn(async move {
                let state = match executor.execute(&mut running).await {
                    Ok(()) => running.state,
                    Err(e) => {
                        warn!(task_id = %running.id, error = %e, "Execution ended with an error");
                        State::Failed
                    }
                };
                let _ = tx.send(state);
            });
        }

        let interval = Duration::from_secs(task.report_interval.max(1));
        loop {
            tokio::select! {
                biased;

                result = &mut completion => {
                    let state = match result {
                        Ok(state) if state.is_terminal() => state,
                        Ok(state) => {
                            error!(task_id = %task.id, state = ?state, "Executor returned a non-terminal state");
                            State::Failed
                        }
                        Err(_) => {
                            error!(task_id = %task.id, "Execution worker exited without a result");
                            State::Failed
                        }
                    };
                    return self.finish(task, &executor, state).await;
                }

                _ = tokio::time::sleep(interval) => {
                    self.refresh_progress(task, &executor).await;
                    self.report(task).await;
                }
            }
        }
    }

    async fn finish(&self, task: &mut Task, executor: &TaskExecutor, state: State) -> State {
        if let Err(e) = task.transition(state) {
            error!(task_id = %task.id, error = %e, "Could not record terminal state");
        }
        self.refresh_progress(task, executor).await;
        task.finish_time = Some(SystemTime::now());

        info!(task_id = %task.id, state = ?task.state, progress = task.progress, "Task done");
        self.report(task).await;
        task.state
    }

    /// Pulls the executor's progress. Failed reads and lower readings keep
    /// the last known value.
    async fn refresh_progress(&self, task: &mut Task, executor: &TaskExecutor) {
        match executor.progress().await {
            Ok(progress) if progress >= task.progress => task.progress = progress,
            Ok(progress) => {
                debug!(task_id = %task.id, progress, known = task.progress, "Ignoring lower progress reading")
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, progress = task.progress, "Progress read failed")
            }
        }
    }

    async fn report(&self, task: &Task) {
        info!(task_id = %task.id, state = ?task.state, progress = task.progress, "Reporting task");
        if let Err(e) = self.reporter.send_report(task).await {
            warn!(task_id = %task.id, error = %e, "Report not delivered");
        }
    }
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        coordinator: Arc<Coordinator>,
        driver: Arc<dyn ContainerDriver>,
    ) -> Self {
        let reporter: Arc<dyn ReportSender> = coordinator.clone();
        let controller = ExecutionController::new(driver, config.executor_config(), reporter);

        Worker {
            config,
            coordinator,
            controller,
            task_count: 0,
        }
    }

    /// One poll: joins the coordinator if needed, then runs the next task.
    /// Returns the task's terminal state, or `None` when the queue was empty.
    pub async fn run_once(&mut self) -> WorkerResult<Option<State>> {
        if !self.coordinator.is_subscribed().await {
            self.coordinator.subscribe(&self.config.descriptor()).await?;
        }

        let Some(mut task) = self.coordinator.next_task().await? else {
            debug!(worker_id = %self.config.id, "No task available");
            return Ok(None);
        };

        info!(task_id = %task.id, "Received task");
        let state = self.controller.process(&mut task).await;
        self.task_count += 1;
        Ok(Some(state))
    }

    /// Polls forever. Failures are logged and retried on the next round.
    pub async fn run(&mut self) {
        let idle = Duration::from_secs(self.config.poll_interval.max(1));
        loop {
            match self.run_once().await {
                Ok(Some(state)) => {
                    info!(state = ?state, task_count = self.task_count, "Task processed");
                    continue;
                }
                Ok(None) => {}
                Err(WorkerError::Unauthorized) => {
                    info!("Worker token rejected, resubscribing on next poll")
                }
                Err(e) => warn!(error = %e, "Polling the coordinator failed"),
            }
            tokio::time::sleep(idle).await;
        }
    }
}
