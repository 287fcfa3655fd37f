//! Driver for a buildx builder running under the docker-container driver

use crate::driver::control::ControlClient;
use crate::driver::mux::{Frame, FrameStream, MuxConn};
use crate::driver::runtime::{ByteStream, Driver, TarStream};
use crate::driver::usage::{prune_filters, render_disk_usage, total_size, RecordType};
use crate::error::{BkStateError, BkStateResult};
use async_trait::async_trait;
use bollard::container::{
    DownloadFromContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::StreamExt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Seconds before a Docker API request is abandoned
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Command that bridges the control socket onto the exec session's stdio
const DIAL_STDIO: [&str; 2] = ["buildctl", "dial-stdio"];

/// Container name buildx gives the first node of a builder
pub fn container_name_for(builder: &str) -> String {
    format!("buildx_buildkit_{}0", builder)
}

/// Connect to the Docker daemon.
///
/// `None` uses the local defaults, which honour `DOCKER_HOST`.
pub fn connect_docker(endpoint: Option<&str>) -> BkStateResult<Docker> {
    let docker = match endpoint {
        None => Docker::connect_with_local_defaults(),
        Some(addr) if addr.starts_with("unix://") => {
            Docker::connect_with_unix(addr, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
        }
        Some(addr) if addr.starts_with("tcp://") || addr.starts_with("http://") => {
            Docker::connect_with_http(addr, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
        }
        Some(addr) => {
            return Err(BkStateError::InvalidInput {
                name: "docker-endpoint",
                value: addr.to_string(),
                reason: "expected a unix://, tcp:// or http:// address".to_string(),
            })
        }
    };
    docker.map_err(|e| BkStateError::docker("connecting to the Docker daemon", e))
}

/// Log the daemon version, for debugging runner setups
pub async fn log_docker_version(docker: &Docker) -> BkStateResult<()> {
    let version = docker
        .version()
        .await
        .map_err(|e| BkStateError::docker("querying the Docker version", e))?;
    debug!(
        version = version.version.as_deref().unwrap_or("unknown"),
        api = version.api_version.as_deref().unwrap_or("unknown"),
        "Docker daemon"
    );
    Ok(())
}

/// BuildKit daemon inside a Docker container, controlled through exec
pub struct ContainerDriver {
    docker: Docker,
    container: String,
    control: Option<ControlClient>,
    /// Total size from the latest usage report, used as the extract hint
    last_total: AtomicU64,
}

impl ContainerDriver {
    /// Build a driver and dial the daemon immediately
    pub async fn connect(docker: Docker, container: String) -> BkStateResult<Self> {
        let mut driver = Self::disconnected(docker, container);
        driver.control = Some(driver.dial().await?);
        Ok(driver)
    }

    /// Build a driver without dialing; control calls fail until `resume`
    pub fn disconnected(docker: Docker, container: String) -> Self {
        Self {
            docker,
            container,
            control: None,
            last_total: AtomicU64::new(0),
        }
    }

    async fn dial(&self) -> BkStateResult<ControlClient> {
        let exec = self
            .docker
            .create_exec(
                &self.container,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(DIAL_STDIO.to_vec()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BkStateError::docker(format!("creating exec in {}", self.container), e))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| BkStateError::docker(format!("attaching exec in {}", self.container), e))?;

        match started {
            StartExecResults::Attached { output, input } => {
                let frames: FrameStream = output
                    .map(|item| item.map(Frame::from).map_err(io::Error::other))
                    .boxed();
                debug!(container = %self.container, exec = %exec.id, "dialed buildkitd");
                ControlClient::connect(MuxConn::new(frames, input)).await
            }
            StartExecResults::Detached => Err(BkStateError::Dial {
                container: self.container.clone(),
                reason: "exec session started detached".to_string(),
            }),
        }
    }

    fn control(&self) -> BkStateResult<&ControlClient> {
        self.control.as_ref().ok_or(BkStateError::NotConnected)
    }
}

#[async_trait]
impl Driver for ContainerDriver {
    async fn stop(&self) -> BkStateResult<()> {
        self.docker
            .stop_container(&self.container, None::<StopContainerOptions>)
            .await
            .map_err(|e| BkStateError::docker(format!("stopping {}", self.container), e))
    }

    async fn resume(&mut self) -> BkStateResult<()> {
        self.docker
            .start_container(&self.container, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| BkStateError::docker(format!("starting {}", self.container), e))?;

        if let Some(stale) = self.control.take() {
            // The old session died with the daemon; its close error is expected.
            if let Err(e) = stale.close().await {
                debug!(error = %e, "closed stale control connection");
            }
        }
        self.control = Some(self.dial().await?);
        info!(container = %self.container, "buildkitd resumed");
        Ok(())
    }

    async fn prune_except(&self, keep: &[RecordType]) -> BkStateResult<()> {
        let filters = prune_filters(keep);
        debug!(?filters, "pruning");
        self.control()?.prune(filters).await.map(|_| ())
    }

    async fn print_disk_usage(&self) -> BkStateResult<String> {
        let records = self.control()?.disk_usage().await?;
        self.last_total.store(total_size(&records), Ordering::Relaxed);
        Ok(render_disk_usage(&records))
    }

    async fn copy_from(&self, path: &str) -> BkStateResult<(ByteStream, u64)> {
        let stream = self
            .docker
            .download_from_container(
                &self.container,
                Some(DownloadFromContainerOptions {
                    path: path.to_string(),
                }),
            )
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();
        // Docker does not declare the archive size up front.
        Ok((stream, self.last_total.load(Ordering::Relaxed)))
    }

    async fn copy_to(&self, path: &str, content: TarStream) -> BkStateResult<()> {
        self.docker
            .upload_to_container_streaming(
                &self.container,
                Some(UploadToContainerOptions {
                    path: path.to_string(),
                    ..Default::default()
                }),
                content,
            )
            .await
            .map_err(|e| BkStateError::docker(format!("copying into {}:{}", self.container, path), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_follows_buildx() {
        assert_eq!(container_name_for("ci"), "buildx_buildkit_ci0");
    }

    #[test]
    fn rejects_unknown_endpoint_scheme() {
        let err = connect_docker(Some("ssh://host")).unwrap_err();
        assert!(matches!(err, BkStateError::InvalidInput { name: "docker-endpoint", .. }));
    }

    #[tokio::test]
    async fn disconnected_driver_refuses_control_calls() {
        let docker = connect_docker(Some("http://127.0.0.1:1")).unwrap();
        let driver = ContainerDriver::disconnected(docker, container_name_for("ci"));
        assert!(matches!(
            driver.prune_except(&[]).await,
            Err(BkStateError::NotConnected)
        ));
        assert!(matches!(
            driver.print_disk_usage().await,
            Err(BkStateError::NotConnected)
        ));
    }
}
