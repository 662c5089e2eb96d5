#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use arrebol_worker::tasks::driver::{ContainerConfig, ContainerDriver, append_line_command};
use arrebol_worker::tasks::executor::{ledger_path, runner_command, script_path};
use arrebol_worker::tasks::types::{DockerError, DockerResult, State, Task};
use arrebol_worker::worker::coordinator::ReportSender;
use arrebol_worker::worker::types::{WorkerError, WorkerResult};
use async_trait::async_trait;

pub const CONTAINER_ID: &str = "c0ffee";

/// Driver operations the fake can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Pull,
    Create,
    Start,
    Mkdir,
    Copy,
    Write,
    Run,
    Read,
    Stop,
    Remove,
}

/// In-memory container driver. Files live in a map, and the script runner is
/// simulated: each script line takes `step` and appends `0\r\n` to the
/// ledger.
pub struct FakeDriver {
    pub calls: Mutex<Vec<String>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    containers: Mutex<HashSet<String>>,
    failures: HashSet<Op>,
    image_present: bool,
    step: Duration,
    hold: Duration,
    ledger_seed: Vec<u8>,
}

impl FakeDriver {
    pub fn new() -> Self {
        FakeDriver {
            calls: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            containers: Mutex::new(HashSet::new()),
            failures: HashSet::new(),
            image_present: true,
            step: Duration::ZERO,
            hold: Duration::ZERO,
            ledger_seed: Vec::new(),
        }
    }

    pub fn failing(mut self, op: Op) -> Self {
        self.failures.insert(op);
        self
    }

    pub fn without_image(mut self) -> Self {
        self.image_present = false;
        self
    }

    /// Time the runner spends on each script line.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Time the runner idles after the last line before exiting.
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// Initial ledger content, as if a runner had already written it.
    pub fn with_ledger(mut self, raw: &[u8]) -> Self {
        self.ledger_seed = raw.to_vec();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn called(&self, call: &str) -> bool {
        self.position(call).is_some()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn check(&self, op: Op, command: &str) -> DockerResult<()> {
        if self.failures.contains(&op) {
            return Err(DockerError::CommandFailed {
                command: command.to_string(),
                exit_code: 1,
                stderr: format!("{:?} failed", op),
            });
        }
        Ok(())
    }

    fn ensure_alive(&self, container_id: &str) -> DockerResult<()> {
        if self.containers.lock().unwrap().contains(container_id) {
            Ok(())
        } else {
            Err(DockerError::NotFound(container_id.to_string()))
        }
    }

    fn append(&self, path: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(bytes);
    }

    async fn run_script(&self) -> DockerResult<()> {
        let script = self.files.lock().unwrap().get(&script_path()).cloned();
        let Some(script) = script else {
            return Err(DockerError::CommandFailed {
                command: runner_command(),
                exit_code: 1,
                stderr: format!("{}: No such file or directory", script_path()),
            });
        };
        let lines = String::from_utf8_lossy(&script).lines().count();

        for _ in 0..lines {
            tokio::time::sleep(self.step).await;
            self.append(&ledger_path(), b"0\r\n");
        }
        tokio::time::sleep(self.hold).await;

        self.check(Op::Run, &runner_command())
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    async fn image_exists(&self, image: &str) -> bool {
        self.record(format!("image_exists {}", image));
        self.image_present
    }

    async fn pull_image(&self, image: &str) -> DockerResult<()> {
        self.record(format!("pull {}", image));
        if self.failures.contains(&Op::Pull) {
            return Err(DockerError::Pull {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            });
        }
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> DockerResult<String> {
        self.record(format!("create {}", config.image));
        self.check(Op::Create, "create")?;
        self.containers
            .lock()
            .unwrap()
            .insert(CONTAINER_ID.to_string());
        if !self.ledger_seed.is_empty() {
            self.append(&ledger_path(), &self.ledger_seed);
        }
        Ok(CONTAINER_ID.to_string())
    }

    async fn start_container(&self, container_id: &str) -> DockerResult<()> {
        self.record("start");
        self.ensure_alive(container_id)?;
        self.check(Op::Start, "start")
    }

    async fn stop_container(&self, container_id: &str) -> DockerResult<()> {
        self.record("stop");
        self.ensure_alive(container_id)?;
        self.check(Op::Stop, "stop")
    }

    async fn remove_container(&self, container_id: &str) -> DockerResult<()> {
        self.record("remove");
        self.check(Op::Remove, "remove")?;
        self.containers.lock().unwrap().remove(container_id);
        self.files.lock().unwrap().clear();
        Ok(())
    }

    async fn exec(&self, container_id: &str, command: &str) -> DockerResult<()> {
        self.ensure_alive(container_id)?;

        if command.starts_with("mkdir") {
            self.record("mkdir");
            return self.check(Op::Mkdir, command);
        }
        if let Some(path) = command.strip_prefix("touch ") {
            self.record(format!("touch {}", path));
            self.append(path, b"");
            return Ok(());
        }
        if command == runner_command() {
            self.record("run");
            return self.run_script().await;
        }

        self.record(format!("exec {}", command));
        Ok(())
    }

    async fn write_file(
        &self,
        container_id: &str,
        lines: &[String],
        dest: &str,
    ) -> DockerResult<()> {
        self.ensure_alive(container_id)?;
        self.record("write");
        self.check(Op::Write, "write")?;

        for line in lines {
            let words = shlex::split(&append_line_command(line, dest)).ok_or_else(|| {
                DockerError::CommandFailed {
                    command: line.clone(),
                    exit_code: 2,
                    stderr: "unbalanced quotes".to_string(),
                }
            })?;
            assert_eq!(words.len(), 5, "unexpected write command: {:?}", words);
            assert_eq!(words[0], "echo");
            assert_eq!(words[1], "-E");
            assert_eq!(words[3], ">>");
            self.append(&words[4], format!("{}\n", words[2]).as_bytes());
        }
        Ok(())
    }

    async fn read_file(&self, container_id: &str, path: &str) -> DockerResult<Vec<u8>> {
        self.ensure_alive(container_id)?;
        self.record("read");
        self.check(Op::Read, &format!("cat {}", path))?;
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| DockerError::CommandFailed {
                command: format!("cat {}", path),
                exit_code: 1,
                stderr: "No such file or directory".to_string(),
            })
    }

    async fn copy_file(&self, container_id: &str, src: &Path, dest_dir: &str) -> DockerResult<()> {
        self.ensure_alive(container_id)?;
        self.record("copy");
        self.check(Op::Copy, "copy")?;
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.append(&format!("{}/{}", dest_dir, name), b"#!/bin/bash\n");
        Ok(())
    }
}

/// A report as seen by the coordinator, stamped with the paused clock.
#[derive(Debug, Clone)]
pub struct Report {
    pub state: State,
    pub progress: usize,
    pub at: tokio::time::Instant,
}

pub struct RecordingReporter {
    pub reports: Mutex<Vec<Report>>,
    reject: bool,
}

impl RecordingReporter {
    pub fn new() -> Self {
        RecordingReporter {
            reports: Mutex::new(Vec::new()),
            reject: false,
        }
    }

    /// Records every report but answers each with an error.
    pub fn rejecting() -> Self {
        RecordingReporter {
            reports: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportSender for RecordingReporter {
    async fn send_report(&self, task: &Task) -> WorkerResult<()> {
        self.reports.lock().unwrap().push(Report {
            state: task.state,
            progress: task.progress,
            at: tokio::time::Instant::now(),
        });
        if self.reject {
            return Err(WorkerError::Coordinator {
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

pub fn task_with(commands: usize, report_interval: u64) -> Task {
    let mut task = Task::new(
        "task-1",
        (0..commands).map(|i| format!("echo step-{}", i)).collect(),
    );
    task.report_interval = report_interval;
    task
}
