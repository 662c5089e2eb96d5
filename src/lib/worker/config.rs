use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::stats::{HostStats, host_stats};
use super::types::{WorkerDescriptor, WorkerError, WorkerResult};
use crate::tasks::executor::{ExecutorConfig, RUNNER_FILE_NAME};
use crate::tasks::types::DEFAULT_IMAGE;

pub const DEFAULT_CONFIG_PATH: &str = "worker-conf.json";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Worker configuration as read from `worker-conf.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkerConfig {
    #[serde(rename = "ServerEndPoint")]
    pub server_endpoint: String,
    pub id: String,
    #[serde(default)]
    pub vcpu: String,
    #[serde(default)]
    pub ram: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub queue_id: String,
    #[serde(default)]
    pub docker_host: Option<String>,
    /// Directory holding the script runner.
    #[serde(default)]
    pub bin_path: Option<PathBuf>,
    /// Seconds to wait between polls when the queue is empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl WorkerConfig {
    /// Reads the file, applies environment overrides, and fills host
    /// resources the file leaves blank.
    pub fn load(path: &Path) -> WorkerResult<Self> {
        info!(path = %path.display(), "Loading worker configuration");

        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.fill_host_resources(&host_stats());
        Ok(config)
    }

    pub fn from_json(raw: &str) -> WorkerResult<Self> {
        let config: WorkerConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> WorkerResult<()> {
        if self.server_endpoint.trim().is_empty() {
            return Err(WorkerError::Config("ServerEndPoint is empty".to_string()));
        }
        if self.id.trim().is_empty() {
            return Err(WorkerError::Config("Id is empty".to_string()));
        }
        Ok(())
    }

    /// `BIN_PATH` and `DOCKER_HOST` only fill values the file leaves unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.bin_path.is_none() {
            self.bin_path = lookup("BIN_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from);
        }
        if self.docker_host.is_none() {
            self.docker_host = lookup("DOCKER_HOST").filter(|v| !v.is_empty());
        }
    }

    pub fn fill_host_resources(&mut self, stats: &HostStats) {
        if self.vcpu.trim().is_empty() {
            self.vcpu = stats.total_cpus.to_string();
        }
        if self.ram.trim().is_empty() {
            self.ram = stats.total_memory.to_string();
        }
        if self.address.trim().is_empty() {
            self.address = stats.hostname.clone();
        }
    }

    pub fn endpoint(&self) -> &str {
        self.server_endpoint.trim_end_matches('/')
    }

    pub fn default_image(&self) -> &str {
        match self.image.trim() {
            "" => DEFAULT_IMAGE,
            image => image,
        }
    }

    /// Where the script runner lives: `BinPath`, or beside the worker binary.
    pub fn runner_path(&self) -> PathBuf {
        let dir = match &self.bin_path {
            Some(dir) => dir.clone(),
            None => match std::env::current_exe() {
                Ok(exe) => exe.parent().map(Path::to_path_buf).unwrap_or_default(),
                Err(e) => {
                    warn!(error = %e, "Cannot locate worker binary, looking for runner in cwd");
                    PathBuf::new()
                }
            },
        };
        dir.join(RUNNER_FILE_NAME)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            default_image: self.default_image().to_string(),
            runner_path: self.runner_path(),
            mounts: Vec::new(),
        }
    }

    pub fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor {
            id: self.id.clone(),
            vcpu: self.vcpu.clone(),
            ram: self.ram.clone(),
            image: self.default_image().to_string(),
            address: self.address.clone(),
            queue_id: self.queue_id.clone(),
        }
    }
}
