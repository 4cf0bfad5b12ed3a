//! Running SQL scripts inside disposable sandboxes.
//!
//! This module is not responsible for interpreting what the scripts print. See
//! [`crate::verify`] for corresponding code.

use std::sync::Arc;

use tracing::instrument;

use self::{
    exec::Sandbox,
    model::{RawExecutionOutput, RunError, SandboxLimits, SandboxRuntime, SandboxSpecBuilder},
};

pub mod demux;
pub mod docker;
pub mod exec;
pub mod model;

/// Join the setup script and the query under test. Setup always comes first:
/// the query reads the tables it creates.
pub fn compose_script(setup: &str, query: &str) -> String {
    let mut script = String::with_capacity(setup.len() + query.len() + 1);
    script.push_str(setup.trim_end());
    script.push('\n');
    script.push_str(query.trim());
    script
}

/// Creates one sandbox per script, runs it to completion and removes it.
#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<dyn SandboxRuntime>,
    image: String,
    command: Vec<String>,
    limits: SandboxLimits,
}

impl Orchestrator {
    /// `command` is the engine invocation; the composed script is appended to
    /// it as the last argument.
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        image: impl Into<String>,
        command: Vec<String>,
        limits: SandboxLimits,
    ) -> Self {
        Orchestrator {
            runtime,
            image: image.into(),
            command,
            limits,
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Run `setup` followed by `query` in a fresh sandbox.
    ///
    /// The sandbox is removed before this function returns, whatever the
    /// outcome. A failing script is not an error here: whatever the engine
    /// printed is returned as-is.
    #[instrument(skip(self, setup, query), fields(runtime = %self.runtime.name()))]
    pub async fn run(
        &self,
        setup: &str,
        query: &str,
        tag: &str,
    ) -> Result<RawExecutionOutput, RunError> {
        let mut cmd = self.command.clone();
        cmd.push(compose_script(setup, query));

        let spec = SandboxSpecBuilder::default()
            .image(self.image.as_str())
            .cmd(cmd)
            .tag(tag)
            .limits(self.limits.clone())
            .build()
            .map_err(|e| RunError::Provisioning(model::RuntimeError::Other(e.to_string())))?;

        let sandbox = Sandbox::create(self.runtime.clone(), &spec).await?;
        let res = sandbox.run_to_completion(&self.limits).await;
        sandbox.teardown().await;
        res
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("runtime", &self.runtime.name())
            .field("image", &self.image)
            .field("command", &self.command)
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_script_setup_first() {
        let script = compose_script(
            "CREATE TABLE t(x INT);\nINSERT INTO t VALUES (1);\n\n",
            "  SELECT x FROM t;\n",
        );
        assert_eq!(
            script,
            "CREATE TABLE t(x INT);\nINSERT INTO t VALUES (1);\nSELECT x FROM t;"
        );
    }

    #[test]
    fn test_compose_script_empty_setup() {
        assert_eq!(compose_script("", "SELECT 1;"), "\nSELECT 1;");
    }
}
