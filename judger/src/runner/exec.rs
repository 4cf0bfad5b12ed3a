use std::{future::Future, sync::Arc, time::Duration};

use crate::runner::model::{
    RawExecutionOutput, RunError, RuntimeError, SandboxLimits, SandboxRuntime, SandboxSpec,
};

/// An owned handle to one live sandbox.
///
/// Call [`Sandbox::teardown`] when done. A handle dropped before its teardown
/// finished (panic, cancelled future) schedules the removal onto the current
/// tokio runtime instead, so the sandbox is never left behind.
pub struct Sandbox {
    runtime: Arc<dyn SandboxRuntime>,
    id: String,
    tag: String,
    removed: bool,
}

impl Sandbox {
    pub async fn create(
        runtime: Arc<dyn SandboxRuntime>,
        spec: &SandboxSpec,
    ) -> Result<Self, RuntimeError> {
        let id = runtime.create(spec).await?;
        tracing::debug!(%id, tag = %spec.tag, runtime = %runtime.name(), "Sandbox created");
        Ok(Sandbox {
            runtime,
            id,
            tag: spec.tag.clone(),
            removed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> String {
        if self.tag.is_empty() {
            format!("Sandbox {}", self.id)
        } else {
            format!("Sandbox {} ({})", self.tag, self.id)
        }
    }

    /// Start the sandbox and wait for it to finish within `limits.timeout`,
    /// then collect its output. Starting and collecting are bounded by the
    /// same limit; a runtime that stalls there is a provisioning failure.
    pub async fn run_to_completion(
        &self,
        limits: &SandboxLimits,
    ) -> Result<RawExecutionOutput, RunError> {
        bounded("start", limits.timeout, self.runtime.start(&self.id)).await?;

        let outcome = match tokio::time::timeout(limits.timeout, self.runtime.wait(&self.id)).await
        {
            Ok(res) => res?,
            Err(_) => {
                tracing::info!(sandbox = %self.name(), timeout = ?limits.timeout, "Time limit exceeded, killing");
                if let Err(e) = self.runtime.kill(&self.id).await {
                    // Removal is forced anyway, so this is not fatal.
                    tracing::warn!(sandbox = %self.name(), "Failed to kill sandbox: {}", e);
                }
                return Err(RunError::Timeout(limits.timeout));
            }
        };

        if outcome.oom_killed {
            tracing::info!(sandbox = %self.name(), "Memory limit exceeded");
            return Err(RunError::ResourceLimitExceeded);
        }

        let framed = bounded(
            "logs",
            limits.timeout,
            self.runtime.logs(&self.id, limits.output_limit),
        )
        .await?;
        tracing::debug!(
            sandbox = %self.name(),
            exit_code = outcome.exit_code,
            bytes = framed.len(),
            "Sandbox finished"
        );
        Ok(RawExecutionOutput {
            framed,
            exit_code: outcome.exit_code,
        })
    }

    /// Remove the sandbox. Failures are logged, not returned: there is nothing
    /// the caller could do about them.
    pub async fn teardown(mut self) {
        let res = self.runtime.remove(&self.id).await;
        self.removed = true;
        match res {
            Ok(()) => tracing::debug!(sandbox = %self.name(), "Sandbox removed"),
            Err(e) => tracing::error!(sandbox = %self.name(), "Failed to remove sandbox: {}", e),
        }
    }
}

async fn bounded<T>(
    op: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T, RuntimeError>>,
) -> Result<T, RuntimeError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(RuntimeError::Other(format!(
            "sandbox runtime did not finish `{}` within {:?}",
            op, limit
        ))),
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        tracing::warn!(sandbox = %self.name(), "Sandbox dropped before teardown, scheduling removal");
        let runtime = self.runtime.clone();
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&id).await {
                        tracing::error!(%id, "Deferred sandbox removal failed: {}", e);
                    }
                });
            }
            Err(_) => tracing::error!(%id, "No async runtime left to remove sandbox"),
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("runtime", &self.runtime.name())
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("removed", &self.removed)
            .finish()
    }
}
