use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    catalog::{Catalog, Difficulty, ProblemSpec},
    judge::Judge,
    runner::{
        demux::{FrameWriter, StreamKind},
        model::{RuntimeError, SandboxLimits, SandboxRuntime, SandboxSpec, WaitOutcome},
        Orchestrator,
    },
};

pub const SETUP: &str = "CREATE TABLE t(x INT);\nINSERT INTO t VALUES (1),(2);";
pub const REFERENCE: &str = "SELECT x FROM t ORDER BY x;";

/// What a mocked sandbox does once started.
#[derive(Debug, Clone)]
enum Behavior {
    Finish {
        exit_code: i64,
        stdout: String,
        stderr: String,
    },
    Hang,
    StallStart,
    OutOfMemory,
    FailCreate,
}

struct MockSandbox {
    behavior: Behavior,
    script: String,
}

#[derive(Default)]
struct MockState {
    live: HashMap<String, MockSandbox>,
    created: Vec<String>,
    removed: Vec<String>,
    killed: Vec<String>,
    scripts: Vec<String>,
}

/// A [`SandboxRuntime`] answering with canned output. Sandboxes are matched to
/// rules by searching their script for each rule's pattern, first match wins.
#[derive(Default)]
pub struct MockRuntime {
    rules: Vec<(String, Behavior)>,
    counter: AtomicUsize,
    state: Mutex<MockState>,
}

pub struct MockRuleBuilder<'a> {
    runtime: &'a mut MockRuntime,
    pattern: String,
    behavior: Behavior,
}

impl<'a> MockRuleBuilder<'a> {
    fn finish_fields(&mut self) -> (&mut i64, &mut String, &mut String) {
        if !matches!(self.behavior, Behavior::Finish { .. }) {
            self.behavior = Behavior::Finish {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            };
        }
        match &mut self.behavior {
            Behavior::Finish {
                exit_code,
                stdout,
                stderr,
            } => (exit_code, stdout, stderr),
            _ => unreachable!(),
        }
    }

    pub fn returns(mut self, code: i64) -> Self {
        *self.finish_fields().0 = code;
        self
    }

    pub fn stdout(mut self, s: impl Into<String>) -> Self {
        *self.finish_fields().1 = s.into();
        self
    }

    pub fn stderr(mut self, s: impl Into<String>) -> Self {
        *self.finish_fields().2 = s.into();
        self
    }

    pub fn hangs(mut self) -> Self {
        self.behavior = Behavior::Hang;
        self
    }

    /// The runtime never answers the start request.
    pub fn stalls_on_start(mut self) -> Self {
        self.behavior = Behavior::StallStart;
        self
    }

    pub fn runs_out_of_memory(mut self) -> Self {
        self.behavior = Behavior::OutOfMemory;
        self
    }

    pub fn fails_to_create(mut self) -> Self {
        self.behavior = Behavior::FailCreate;
        self
    }

    pub fn finish(self) {
        self.runtime.rules.push((self.pattern, self.behavior));
    }
}

impl MockRuntime {
    pub fn new() -> MockRuntime {
        Default::default()
    }

    pub fn when(&mut self, pattern: impl Into<String>) -> MockRuleBuilder {
        MockRuleBuilder {
            runtime: self,
            pattern: pattern.into(),
            behavior: Behavior::Finish {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            },
        }
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.state.lock().unwrap().killed.clone()
    }

    /// Scripts of every sandbox created so far.
    pub fn scripts(&self) -> Vec<String> {
        self.state.lock().unwrap().scripts.clone()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// Assert that every sandbox ever created has been removed exactly once.
    pub fn assert_all_removed(&self) {
        let state = self.state.lock().unwrap();
        let mut created = state.created.clone();
        let mut removed = state.removed.clone();
        created.sort();
        removed.sort();
        assert_eq!(created, removed, "Some sandboxes were not removed");
        assert!(state.live.is_empty());
    }

    fn with_sandbox<T>(
        &self,
        id: &str,
        f: impl FnOnce(&MockSandbox) -> T,
    ) -> Result<T, RuntimeError> {
        let state = self.state.lock().unwrap();
        state
            .live
            .get(id)
            .map(f)
            .ok_or_else(|| RuntimeError::Other(format!("No such sandbox: {}", id)))
    }
}

#[async_trait]
impl SandboxRuntime for MockRuntime {
    fn name(&self) -> Cow<'static, str> {
        "mock".into()
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<String, RuntimeError> {
        let script = spec.cmd.last().cloned().unwrap_or_default();
        let behavior = self
            .rules
            .iter()
            .find(|(pat, _)| script.contains(pat.as_str()))
            .map(|(_, b)| b.clone())
            .ok_or_else(|| RuntimeError::Other(format!("No mock rule for {:?}", script)))?;

        if let Behavior::FailCreate = behavior {
            return Err(RuntimeError::Other("mock daemon is unavailable".into()));
        }

        let id = format!("mock-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().unwrap();
        state.created.push(id.clone());
        state.scripts.push(script.clone());
        state.live.insert(id.clone(), MockSandbox { behavior, script });
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let behavior = self.with_sandbox(id, |s| s.behavior.clone())?;
        if let Behavior::StallStart = behavior {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<WaitOutcome, RuntimeError> {
        let behavior = self.with_sandbox(id, |s| s.behavior.clone())?;
        match behavior {
            Behavior::Finish { exit_code, .. } => Ok(WaitOutcome {
                exit_code,
                oom_killed: false,
            }),
            Behavior::OutOfMemory => Ok(WaitOutcome {
                exit_code: 137,
                oom_killed: true,
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RuntimeError::Other("still hanging".into()))
            }
            Behavior::StallStart | Behavior::FailCreate => unreachable!(),
        }
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        self.with_sandbox(id, |_| ())?;
        self.state.lock().unwrap().killed.push(id.to_owned());
        Ok(())
    }

    async fn logs(&self, id: &str, limit: usize) -> Result<Bytes, RuntimeError> {
        let (stdout, stderr) = self.with_sandbox(id, |s| match &s.behavior {
            Behavior::Finish { stdout, stderr, .. } => (stdout.clone(), stderr.clone()),
            _ => Default::default(),
        })?;
        let mut w = FrameWriter::new();
        if !stdout.is_empty() {
            w.push(StreamKind::StdOut, &stdout.as_bytes()[..stdout.len().min(limit)]);
        }
        if !stderr.is_empty() {
            w.push(StreamKind::StdErr, stderr.as_bytes());
        }
        Ok(w.finish())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        match state.live.remove(id) {
            Some(s) => {
                tracing::trace!(%id, script = %s.script, "Mock sandbox removed");
                state.removed.push(id.to_owned());
                Ok(())
            }
            None => Err(RuntimeError::Other(format!("No such sandbox: {}", id))),
        }
    }
}

pub fn test_limits() -> SandboxLimits {
    SandboxLimits {
        timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

pub fn test_catalog() -> Arc<Catalog> {
    let problem = ProblemSpec {
        id: 1,
        slug: "list-numbers".into(),
        title: "List Numbers".into(),
        difficulty: Difficulty::Easy,
        category: "Basics".into(),
        description: "List every x.".into(),
        setup: SETUP.into(),
        solution: REFERENCE.into(),
        hints: vec![],
    };
    Arc::new(Catalog::new(vec![problem]).unwrap())
}

pub fn make_judge(runtime: Arc<MockRuntime>) -> Judge {
    let orchestrator = Orchestrator::new(
        runtime,
        "sql-sandbox",
        vec!["sqlite3".into(), "-json".into(), ":memory:".into()],
        test_limits(),
    );
    Judge::new(orchestrator, test_catalog())
}
