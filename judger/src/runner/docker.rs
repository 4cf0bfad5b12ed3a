//! [`SandboxRuntime`] backed by a Docker daemon.

use std::{borrow::Cow, collections::HashMap, fmt::Write};

use async_trait::async_trait;
use bollard::{
    container::{
        Config, InspectContainerOptions, ListContainersOptions, KillContainerOptions, LogOutput, LogsOptions,
        RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
    },
    models::HostConfig,
    Docker,
};
use bytes::Bytes;
use futures::StreamExt;

use super::{
    demux::{FrameWriter, StreamKind, HEADER_LEN},
    model::{RuntimeError, SandboxLimits, SandboxRuntime, SandboxSpec, WaitOutcome},
};

/// Label attached to every container we create. Its value is the sandbox tag.
pub const SANDBOX_LABEL: &str = "sql-judger.sandbox";

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        DockerRuntime { docker }
    }

    pub fn connect_with_local_defaults() -> Result<Self, RuntimeError> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Check that the daemon answers and that `image` is present locally.
    pub async fn check_ready(&self, image: &str) -> Result<(), RuntimeError> {
        self.docker.ping().await?;
        self.docker.inspect_image(image).await?;
        Ok(())
    }

    /// Force-remove every container carrying [`SANDBOX_LABEL`], returning how
    /// many were found. Only call this while no judgement is running.
    pub async fn remove_leftovers(&self) -> Result<usize, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![SANDBOX_LABEL.to_string()]);
        let leftovers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let count = leftovers.len();
        for id in leftovers.into_iter().filter_map(|c| c.id) {
            tracing::info!(%id, "Removing leftover sandbox");
            self.remove(&id).await?;
        }
        Ok(count)
    }
}

/// Errors decoding a single streamed item. The stream itself is still usable.
fn is_recoverable_error(e: &bollard::errors::Error) -> bool {
    use bollard::errors::Error::*;
    matches!(
        e,
        JsonDataError { .. } | JsonSerdeError { .. } | StrParseError { .. } | StrFmtError { .. }
    )
}

fn host_config(limits: &SandboxLimits) -> HostConfig {
    HostConfig {
        // set memory limits, swap included
        memory: Some(limits.memory),
        memory_swap: Some(limits.memory),
        // set cpu limits
        nano_cpus: Some((limits.cpu_share * 1e9) as i64),
        pids_limit: Some(limits.pids_limit),
        network_mode: Some("none".into()),
        cap_drop: Some(vec!["ALL".into()]),
        security_opt: Some(vec!["no-new-privileges".into()]),
        ..Default::default()
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> Cow<'static, str> {
        "docker".into()
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<String, RuntimeError> {
        let labels = Some((SANDBOX_LABEL.to_string(), spec.tag.clone()))
            .into_iter()
            .collect::<HashMap<_, _>>();

        let res = self
            .docker
            .create_container::<String, String>(
                None,
                Config {
                    image: Some(spec.image.clone()),
                    cmd: Some(spec.cmd.clone()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    // raw frames, no terminal control sequences
                    tty: Some(false),
                    network_disabled: Some(true),
                    labels: Some(labels),
                    host_config: Some(host_config(&spec.limits)),
                    ..Default::default()
                },
            )
            .await?;
        Ok(res.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<WaitOutcome, RuntimeError> {
        let mut wait = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        let mut status_code = None;
        while let Some(res) = wait.next().await {
            match res {
                Ok(res) => status_code = Some(res.status_code),
                Err(e) if is_recoverable_error(&e) => continue,
                Err(e) => {
                    // Newer daemons report non-zero exits as wait errors; the
                    // inspection below is authoritative either way.
                    tracing::debug!(%id, "wait_container ended with: {}", e);
                    break;
                }
            }
        }

        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let state = info.state.unwrap_or_default();
        if state.running == Some(true) {
            return Err(RuntimeError::Other(format!(
                "container {} is still running after wait returned",
                id
            )));
        }

        Ok(WaitOutcome {
            exit_code: state.exit_code.or(status_code).unwrap_or(-1),
            oom_killed: state.oom_killed.unwrap_or(false),
        })
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn logs(&self, id: &str, limit: usize) -> Result<Bytes, RuntimeError> {
        let mut logs = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: "all".into(),
                ..Default::default()
            }),
        );

        let mut out = SizeConstraintFrames::new(limit);
        while let Some(chunk) = logs.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) if is_recoverable_error(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            match chunk {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    out.append(StreamKind::StdOut, &message)
                }
                LogOutput::StdErr { message } => out.append(StreamKind::StdErr, &message),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(out.finish())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

/// Re-frames log chunks while keeping the total size under a limit.
struct SizeConstraintFrames {
    size_limit: usize,
    frames: FrameWriter,
    oversized: bool,
}

impl SizeConstraintFrames {
    pub fn new(size_limit: usize) -> Self {
        SizeConstraintFrames {
            size_limit,
            frames: FrameWriter::new(),
            oversized: false,
        }
    }

    pub fn append(&mut self, kind: StreamKind, bytes: &[u8]) {
        let room = self
            .size_limit
            .saturating_sub(self.frames.len() + HEADER_LEN);
        if self.oversized || room == 0 {
            self.oversized = true;
        } else if bytes.len() > room {
            self.frames.push(kind, &bytes[..room]);
            self.oversized = true;
        } else {
            self.frames.push(kind, bytes);
        }
    }

    pub fn finish(mut self) -> Bytes {
        if self.oversized {
            let mut s = String::new();
            writeln!(s).ok();
            writeln!(s, "--- output capped out at {} bytes ---", self.size_limit).ok();
            self.frames.push(StreamKind::StdErr, s.as_bytes());
        }
        self.frames.finish()
    }
}
