use async_trait::async_trait;
use bytes::Bytes;
use derive_builder::Builder;
use err_derive::Error;
use std::{borrow::Cow, time::Duration};

use super::demux;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MEMORY_LIMIT: i64 = 100 * 1024 * 1024;
pub const DEFAULT_CPU_SHARE: f64 = 0.5;
pub const DEFAULT_PIDS_LIMIT: i64 = 64;
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Resource policy applied to every sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxLimits {
    /// Wall-clock limit, measured from container start to exit.
    pub timeout: Duration,
    /// Memory ceiling in bytes. Swap is disabled, so this is also the swap limit.
    pub memory: i64,
    /// Fraction of one CPU core the container may use.
    pub cpu_share: f64,
    pub pids_limit: i64,
    /// Maximum number of framed output bytes kept from one run.
    pub output_limit: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            timeout: DEFAULT_TIMEOUT,
            memory: DEFAULT_MEMORY_LIMIT,
            cpu_share: DEFAULT_CPU_SHARE,
            pids_limit: DEFAULT_PIDS_LIMIT,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

/// Everything a runtime needs to create one sandbox.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct SandboxSpec {
    /// The image containing the database engine
    pub image: String,

    /// Full command line, script included as the last argument
    pub cmd: Vec<String>,

    /// A tag for this sandbox. Not used by the runtime for anything other than
    /// labelling & debugging.
    #[builder(default)]
    pub tag: String,

    #[builder(default)]
    pub limits: SandboxLimits,
}

/// How a sandbox ended, as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    pub exit_code: i64,
    pub oom_killed: bool,
}

/// Output captured from one sandbox, still in its framed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExecutionOutput {
    pub framed: Bytes,
    pub exit_code: i64,
}

impl RawExecutionOutput {
    /// Demultiplex the captured frames into text.
    pub fn text(&self) -> String {
        demux::decode(&self.framed)
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(display = "Docker error: {}", _0)]
    Docker(#[error(source)] bollard::errors::Error),

    #[error(display = "{}", _0)]
    Other(String),
}

/// Failure of one sandboxed run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(display = "Failed to provision sandbox: {}", _0)]
    Provisioning(#[error(source)] RuntimeError),

    #[error(display = "Execution timed out after {:?}", _0)]
    Timeout(Duration),

    #[error(display = "Sandbox exceeded its memory limit")]
    ResourceLimitExceeded,
}

/// Something that can host disposable sandboxes.
///
/// Implementations must be safe to share between concurrently running
/// judgements; every method acts on a single sandbox identified by `id`.
#[async_trait]
pub trait SandboxRuntime: Sync + Send {
    /// The name of this runtime, used in logs
    fn name(&self) -> Cow<'static, str>;

    /// Create (but do not start) a sandbox, returning its id.
    async fn create(&self, spec: &SandboxSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Wait until the sandbox stops running.
    async fn wait(&self, id: &str) -> Result<WaitOutcome, RuntimeError>;

    async fn kill(&self, id: &str) -> Result<(), RuntimeError>;

    /// Fetch everything the sandbox wrote, framed, capped at `limit` bytes.
    async fn logs(&self, id: &str, limit: usize) -> Result<Bytes, RuntimeError>;

    /// Remove the sandbox, killing it first if it is still running.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;
}
