use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::{
    API_DEFAULT_VERSION, Docker,
    container::{
        Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
        StopContainerOptions, UploadToContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, Mount as DockerMount, MountTypeEnum},
};
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

use super::driver::{ContainerConfig, ContainerDriver, append_line_command};
use super::types::{DockerError, DockerResult};

const STOP_GRACE_SECS: i64 = 5;
const REMOVE_TIMEOUT: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TAG: &str = "latest";

/// Container driver backed by a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
}

impl DockerClient {
    /// Connects to `host` (`tcp://addr:port` or `addr:port`), or to the local
    /// unix socket when no host is given.
    pub fn new(host: Option<&str>) -> DockerResult<Self> {
        let client = match host {
            Some(host) => {
                info!(host, "Connecting to docker daemon");
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_unix_defaults()?,
        };

        Ok(DockerClient { client })
    }

    /// Runs `command` through bash and returns its stdout.
    async fn exec_output(&self, container_id: &str, command: &str) -> DockerResult<Vec<u8>> {
        debug!(container_id, command, "Executing command");

        let options = CreateExecOptions {
            cmd: Some(vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                command.to_string(),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, options)
            .await
            .map_err(|e| not_found_or(container_id, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match self.client.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg? {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            stdout.extend_from_slice(&message)
                        }
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => return Err(DockerError::Detached(command.to_string())),
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(0);
        if exit_code != 0 {
            return Err(DockerError::CommandFailed {
                command: command.to_string(),
                exit_code,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

/// An image reference split the way the daemon's pull endpoint wants it.
/// `tag` is either a tag or a `sha256:` digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
    digest: bool,
}

impl ImageRef {
    pub fn parse(image: &str) -> Self {
        let image = image.trim();
        if let Some((repository, digest)) = image.split_once('@') {
            return ImageRef {
                repository: repository.to_string(),
                tag: digest.to_string(),
                digest: true,
            };
        }

        // a colon before the last slash belongs to a registry host:port
        let name_start = image.rfind('/').map_or(0, |i| i + 1);
        match image[name_start..].rfind(':') {
            Some(i) => ImageRef {
                repository: image[..name_start + i].to_string(),
                tag: image[name_start + i + 1..].to_string(),
                digest: false,
            },
            None => ImageRef {
                repository: image.to_string(),
                tag: DEFAULT_TAG.to_string(),
                digest: false,
            },
        }
    }

    /// Full reference, with the implicit tag spelled out.
    pub fn reference(&self) -> String {
        let sep = if self.digest { '@' } else { ':' };
        format!("{}{}{}", self.repository, sep, self.tag)
    }
}

fn not_found_or(container_id: &str, err: BollardError) -> DockerError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => DockerError::NotFound(container_id.to_string()),
        e => DockerError::Client(e),
    }
}

fn executable_archive(src: &Path) -> DockerResult<Vec<u8>> {
    let file_name = src.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", src.display()),
        )
    })?;
    let data = std::fs::read(src)?;

    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();

    let mut archive = tar::Builder::new(Vec::new());
    archive.append_data(&mut header, file_name, data.as_slice())?;
    Ok(archive.into_inner()?)
}

#[async_trait]
impl ContainerDriver for DockerClient {
    async fn image_exists(&self, image: &str) -> bool {
        let reference = ImageRef::parse(image).reference();
        match self.client.inspect_image(&reference).await {
            Ok(_) => true,
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => false,
            Err(e) => {
                warn!(image, error = %e, "Image inspection failed, treating image as absent");
                false
            }
        }
    }

    async fn pull_image(&self, image: &str) -> DockerResult<()> {
        let image_ref = ImageRef::parse(image);
        info!(image, tag = %image_ref.tag, "Pulling image");

        // an empty tag makes the daemon pull every tag of the repository
        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: image_ref.repository.clone(),
                tag: image_ref.tag.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(msg) = stream.next().await {
            let info = msg.map_err(|e| DockerError::Pull {
                image: image.to_string(),
                message: e.to_string(),
            })?;
            if let Some(message) = info.error {
                return Err(DockerError::Pull {
                    image: image.to_string(),
                    message,
                });
            }
            if let Some(status) = info.status {
                debug!(image, status = %status, "Pull progress");
            }
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> DockerResult<String> {
        info!(name = %config.name, image = %config.image, "Creating container");

        let mounts = config
            .mounts
            .iter()
            .map(|m| DockerMount {
                source: Some(m.source.clone()),
                target: Some(m.target.clone()),
                read_only: Some(m.read_only),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            })
            .collect();

        let container_config = Config {
            image: Some(config.image.clone()),
            tty: Some(true),
            host_config: Some(HostConfig {
                mounts: Some(mounts),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        });

        let response = self
            .client
            .create_container(options, container_config)
            .await?;

        info!(container_id = %response.id, name = %config.name, "Container created");
        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> DockerResult<()> {
        info!(container_id, "Starting container");
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found_or(container_id, e))
    }

    async fn stop_container(&self, container_id: &str) -> DockerResult<()> {
        info!(container_id, "Stopping container");
        let options = StopContainerOptions {
            t: STOP_GRACE_SECS,
        };

        match self.client.stop_container(container_id, Some(options)).await {
            Ok(_) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(container_id, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(not_found_or(container_id, e)),
        }
    }

    async fn remove_container(&self, container_id: &str) -> DockerResult<()> {
        info!(container_id, "Removing container");
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        let removal = self.client.remove_container(container_id, Some(options));
        match tokio::time::timeout(REMOVE_TIMEOUT, removal).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            })) => {
                debug!(container_id, "Container already removed");
                Ok(())
            }
            Ok(Err(e)) => Err(DockerError::Client(e)),
            Err(_) => Err(DockerError::Timeout {
                operation: format!("removing container {}", container_id),
                seconds: REMOVE_TIMEOUT.as_secs(),
            }),
        }
    }

    async fn exec(&self, container_id: &str, command: &str) -> DockerResult<()> {
        self.exec_output(container_id, command).await.map(|_| ())
    }

    async fn write_file(
        &self,
        container_id: &str,
        lines: &[String],
        dest: &str,
    ) -> DockerResult<()> {
        for line in lines {
            debug!(container_id, dest, line = %line, "Writing line");
            self.exec(container_id, &append_line_command(line, dest))
                .await?;
        }
        Ok(())
    }

    async fn read_file(&self, container_id: &str, path: &str) -> DockerResult<Vec<u8>> {
        debug!(container_id, path, "Reading file");
        self.exec_output(container_id, &format!("cat {}", path))
            .await
    }

    async fn copy_file(&self, container_id: &str, src: &Path, dest_dir: &str) -> DockerResult<()> {
        info!(container_id, src = %src.display(), dest_dir, "Copying file into container");

        let archive = executable_archive(src)?;
        let options = UploadToContainerOptions {
            path: dest_dir.to_string(),
            ..Default::default()
        };

        self.client
            .upload_to_container(container_id, Some(options), archive.into())
            .await
            .map_err(|e| not_found_or(container_id, e))
    }
}
