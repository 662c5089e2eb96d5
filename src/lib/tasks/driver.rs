use std::path::Path;

use async_trait::async_trait;

use super::types::DockerResult;

/// Bind mount handed to the container at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
}

/// Primitive container operations the task executor is built on.
///
/// Every in-container command is run through `/bin/bash -c`.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Whether the image is present locally. Daemon errors count as absent.
    async fn image_exists(&self, image: &str) -> bool;

    async fn pull_image(&self, image: &str) -> DockerResult<()>;

    /// Creates a container and returns its id.
    async fn create_container(&self, config: &ContainerConfig) -> DockerResult<String>;

    async fn start_container(&self, container_id: &str) -> DockerResult<()>;

    /// Stops the container; a container that is already stopped is fine.
    async fn stop_container(&self, container_id: &str) -> DockerResult<()>;

    /// Removes the container; a container that is already gone is fine.
    async fn remove_container(&self, container_id: &str) -> DockerResult<()>;

    /// Runs `command` to completion, failing on a non-zero exit code.
    async fn exec(&self, container_id: &str, command: &str) -> DockerResult<()>;

    /// Appends each line verbatim to `dest`, in order.
    async fn write_file(&self, container_id: &str, lines: &[String], dest: &str)
    -> DockerResult<()>;

    async fn read_file(&self, container_id: &str, path: &str) -> DockerResult<Vec<u8>>;

    /// Uploads a host file into `dest_dir`, keeping its file name.
    async fn copy_file(&self, container_id: &str, src: &Path, dest_dir: &str)
    -> DockerResult<()>;
}

/// Wraps `line` in single quotes so the shell hands it back byte for byte.
pub fn shell_quote(line: &str) -> String {
    format!("'{}'", line.replace('\'', r#"'"'"'"#))
}

/// Shell command appending `line` to `dest`.
pub fn append_line_command(line: &str, dest: &str) -> String {
    format!("echo -E {} >> {}", shell_quote(line), dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_wrapped_in_single_quotes() {
        assert_eq!(shell_quote("ls /"), "'ls /'");
    }

    #[test]
    fn single_quotes_are_escaped() {
        assert_eq!(shell_quote("echo 'hi'"), r#"'echo '"'"'hi'"'"''"#);
    }

    #[test]
    fn append_command_targets_destination() {
        assert_eq!(
            append_line_command("echo $HOME", "/arrebol/task-id.ts"),
            "echo -E 'echo $HOME' >> /arrebol/task-id.ts"
        );
    }
}
