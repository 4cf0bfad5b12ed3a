use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::runner::model::{
    SandboxLimits, DEFAULT_CPU_SHARE, DEFAULT_MEMORY_LIMIT, DEFAULT_OUTPUT_LIMIT,
    DEFAULT_PIDS_LIMIT, DEFAULT_TIMEOUT,
};

/// Docker refuses memory limits below this.
const MIN_MEMORY_LIMIT_MB: u64 = 6;

/// Smaller output limits would cut off even a one-row result set.
const MIN_OUTPUT_LIMIT: usize = 1024;

/// The contents of `judger.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct JudgerConfig {
    /// Address the HTTP service listens on
    pub bind: String,

    /// Path of the problem catalog. Relative paths are resolved against the
    /// directory of the config file.
    pub problems: PathBuf,

    pub sandbox: SandboxConfig,
}

impl Default for JudgerConfig {
    fn default() -> Self {
        JudgerConfig {
            bind: "127.0.0.1:3000".into(),
            problems: "problems.json".into(),
            sandbox: Default::default(),
        }
    }
}

/// How every sandbox is created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Image containing the database engine. Must already exist locally.
    pub image: String,

    /// Engine invocation. The script is appended as the last argument.
    pub command: Vec<String>,

    pub memory_limit_mb: u64,

    /// CPU share available to one sandbox. `0.5` allows the container to run
    /// for 50ms in every 100ms of CPU time.
    pub cpu_share: f64,

    /// Wall-clock limit of one run, in milliseconds.
    pub timeout_ms: u64,

    pub pids_limit: i64,

    /// Maximum bytes of output kept from one run.
    pub output_limit: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            image: "sql-sandbox".into(),
            command: ["sqlite3", "-bail", "-json", ":memory:"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            memory_limit_mb: (DEFAULT_MEMORY_LIMIT / 1024 / 1024) as u64,
            cpu_share: DEFAULT_CPU_SHARE,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            pids_limit: DEFAULT_PIDS_LIMIT,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl SandboxConfig {
    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_millis(self.timeout_ms),
            memory: memory_bytes(self.memory_limit_mb).unwrap_or(i64::MAX),
            cpu_share: self.cpu_share,
            pids_limit: self.pids_limit,
            output_limit: self.output_limit,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.image.is_empty() {
            bail!("sandbox.image must not be empty");
        }
        if self.command.is_empty() {
            bail!("sandbox.command must not be empty");
        }
        if self.memory_limit_mb < MIN_MEMORY_LIMIT_MB {
            bail!(
                "sandbox.memory_limit_mb must be at least {}, got {}",
                MIN_MEMORY_LIMIT_MB,
                self.memory_limit_mb
            );
        }
        if memory_bytes(self.memory_limit_mb).is_none() {
            bail!(
                "sandbox.memory_limit_mb is too large, got {}",
                self.memory_limit_mb
            );
        }
        if self.output_limit < MIN_OUTPUT_LIMIT {
            bail!(
                "sandbox.output_limit must be at least {}, got {}",
                MIN_OUTPUT_LIMIT,
                self.output_limit
            );
        }
        if !(self.cpu_share > 0.0) {
            bail!("sandbox.cpu_share must be positive, got {}", self.cpu_share);
        }
        if self.timeout_ms == 0 {
            bail!("sandbox.timeout_ms must be positive");
        }
        if self.pids_limit <= 0 {
            bail!("sandbox.pids_limit must be positive");
        }
        Ok(())
    }
}

fn memory_bytes(mb: u64) -> Option<i64> {
    mb.checked_mul(1024 * 1024)
        .and_then(|b| i64::try_from(b).ok())
}

impl JudgerConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let cfg: JudgerConfig = toml::from_str(s).context("Invalid judger config")?;
        cfg.sandbox.validate()?;
        Ok(cfg)
    }

    /// Read the config at `path`, or use the defaults if `path` is `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p,
            None => {
                tracing::info!("No config file given, using defaults");
                return Ok(Self::default());
            }
        };
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&s)
            .with_context(|| format!("Failed to load config file {}", path.display()))?;
        if let Some(base) = path.parent() {
            cfg.problems = base.join(&cfg.problems);
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_is_default() {
        let cfg = JudgerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, JudgerConfig::default());
        assert_eq!(cfg.sandbox.limits(), SandboxLimits::default());
    }

    #[test]
    fn test_partial_config() {
        let cfg = JudgerConfig::from_toml_str(
            r#"
            bind = "0.0.0.0:8080"

            [sandbox]
            timeout_ms = 1500
            memory_limit_mb = 64
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8080");
        assert_eq!(cfg.problems, PathBuf::from("problems.json"));
        let limits = cfg.sandbox.limits();
        assert_eq!(limits.timeout, Duration::from_millis(1500));
        assert_eq!(limits.memory, 64 * 1024 * 1024);
        assert_eq!(limits.cpu_share, DEFAULT_CPU_SHARE);
        assert_eq!(cfg.sandbox.image, "sql-sandbox");
    }

    #[test]
    fn test_invalid_limits_rejected() {
        assert!(JudgerConfig::from_toml_str("[sandbox]\ncpu_share = 0.0").is_err());
        assert!(JudgerConfig::from_toml_str("[sandbox]\nmemory_limit_mb = 1").is_err());
        assert!(JudgerConfig::from_toml_str("[sandbox]\ncommand = []").is_err());
        assert!(JudgerConfig::from_toml_str("[sandbox]\ntimeout_ms = 0").is_err());
        assert!(JudgerConfig::from_toml_str("[sandbox]\noutput_limit = 8").is_err());
        assert!(JudgerConfig::from_toml_str("[sandbox]\noutput_limit = 0").is_err());
    }

    #[test]
    fn test_huge_memory_limit_rejected() {
        let err = JudgerConfig::from_toml_str("[sandbox]\nmemory_limit_mb = 9000000000000")
            .unwrap_err();
        assert!(format!("{:?}", err).contains("too large"), "{:?}", err);

        let cfg = SandboxConfig {
            memory_limit_mb: u64::MAX,
            ..Default::default()
        };
        assert_eq!(cfg.limits().memory, i64::MAX);
    }
}
