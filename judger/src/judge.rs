//! Judging one submission: look the problem up, run the submitted query and
//! the reference query side by side, and compare what they return.

use std::{fmt, sync::Arc, time::Duration};

use err_derive::Error;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::instrument;
use tracing_futures::Instrument;

use crate::{
    catalog::{Catalog, ProblemSpec},
    runner::{model::RunError, Orchestrator},
    util::names::random_tag,
    verify::{compare_results, extract, ExtractError, StructuredResult},
};

pub const MISMATCH_MESSAGE: &str = "Your output did not match the expected output.";
pub const SYSTEM_ERROR_MESSAGE: &str =
    "Something went wrong while judging your submission. Please try again later.";
pub const PROBLEM_NOT_FOUND_MESSAGE: &str = "Problem not found.";

/// An inbound submission.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    pub submitted_query: String,
    pub problem_slug: String,
}

/// Where a judgement currently is. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Locating,
    RunningUser,
    RunningReference,
    Comparing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Locating => "locating",
            Stage::RunningUser => "running-user",
            Stage::RunningReference => "running-reference",
            Stage::Comparing => "comparing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonVerdict {
    pub is_correct: bool,
    pub user_result: StructuredResult,
    pub reference_result: StructuredResult,
}

/// Why a submitted query could not be compared at all. These are the user's
/// mistakes, not ours.
#[derive(Debug, Clone, PartialEq)]
pub enum UserFailure {
    /// The engine printed something other than a result set; usually an
    /// error message, kept verbatim.
    SqlError(String),
    /// Something that looked like a result set but did not parse.
    MalformedOutput { payload: String, reason: String },
    Timeout(Duration),
    MemoryLimitExceeded,
}

impl UserFailure {
    pub fn message(&self) -> String {
        match self {
            UserFailure::SqlError(msg) => msg.clone(),
            UserFailure::MalformedOutput { payload, reason } => format!(
                "Your query produced output that could not be read as a result set ({}):\n{}",
                reason, payload
            ),
            UserFailure::Timeout(limit) => format!(
                "Your query exceeded the time limit of {:.1}s.",
                limit.as_secs_f64()
            ),
            UserFailure::MemoryLimitExceeded => "Your query exceeded the memory limit.".into(),
        }
    }
}

/// A finished judgement.
#[derive(Debug, Clone, PartialEq)]
pub enum Judgement {
    Compared {
        title: String,
        verdict: ComparisonVerdict,
    },
    Rejected {
        title: String,
        failure: UserFailure,
    },
}

impl Judgement {
    pub fn is_correct(&self) -> bool {
        matches!(self, Judgement::Compared { verdict, .. } if verdict.is_correct)
    }
}

/// A judgement that could not be made. None of these are the user's fault.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error(display = "No problem with slug {}", _0)]
    ProblemNotFound(String),

    #[error(display = "Sandbox failure on the submitted query: {}", _0)]
    Provisioning(#[error(source, no_from)] RunError),

    #[error(display = "Reference query of {} failed to run: {}", _0, _1)]
    ReferenceRun(String, #[error(source, no_from)] RunError),

    #[error(display = "Reference query of {} produced unusable output: {}", _0, _1)]
    CorruptReference(String, #[error(source, no_from)] ExtractError),

    #[error(display = "Judging task failed: {}", _0)]
    Internal(String),
}

/// Failure of one run, before it is classified as the user's or ours.
#[derive(Debug)]
enum RunFailure {
    Run(RunError),
    Extract(ExtractError),
}

/// The pipeline. Cheap to clone; clones share the runtime, the catalog and
/// the set of in-flight runs.
#[derive(Debug, Clone)]
pub struct Judge {
    orchestrator: Orchestrator,
    catalog: Arc<Catalog>,
    runs: TaskTracker,
}

impl Judge {
    pub fn new(orchestrator: Orchestrator, catalog: Arc<Catalog>) -> Self {
        Judge {
            orchestrator,
            catalog,
            runs: TaskTracker::new(),
        }
    }

    /// Number of sandbox runs still in flight.
    pub fn running(&self) -> usize {
        self.runs.len()
    }

    /// Wait until every in-flight run, including those whose caller has gone
    /// away, has torn its sandbox down. Call once no new judgements can
    /// arrive.
    pub async fn shutdown(&self) {
        self.runs.close();
        if !self.runs.is_empty() {
            tracing::info!(running = self.runs.len(), "Waiting for sandbox runs to finish");
        }
        self.runs.wait().await;
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Judge one submission.
    ///
    /// Both queries run in their own sandbox on spawned tasks, so dropping the
    /// returned future (e.g. because the client went away) never interrupts a
    /// sandbox before its teardown.
    #[instrument(skip(self, req), fields(slug = %req.problem_slug))]
    pub async fn judge(&self, req: &JudgeRequest) -> Result<Judgement, JudgeError> {
        let res = self.judge_inner(req).await;
        match &res {
            Ok(j) => tracing::info!(stage = %Stage::Done, correct = j.is_correct(), "Judged"),
            Err(JudgeError::ProblemNotFound(_)) => {
                tracing::info!(stage = %Stage::Failed, "Problem not found")
            }
            Err(e) => tracing::error!(stage = %Stage::Failed, "System failure: {}", e),
        }
        res
    }

    async fn judge_inner(&self, req: &JudgeRequest) -> Result<Judgement, JudgeError> {
        tracing::debug!(stage = %Stage::Locating);
        let problem = self
            .catalog
            .get_by_slug(&req.problem_slug)
            .ok_or_else(|| JudgeError::ProblemNotFound(req.problem_slug.clone()))?;

        let tag = random_tag(&problem.slug);
        tracing::debug!(stage = %Stage::RunningUser, %tag);
        let user = self.spawn_run(problem, &req.submitted_query, format!("{}-user", tag));
        tracing::debug!(stage = %Stage::RunningReference, %tag);
        let reference = self.spawn_run(problem, &problem.solution, format!("{}-ref", tag));

        let (user, reference) = tokio::join!(user, reference);
        let user = user.map_err(|e| JudgeError::Internal(e.to_string()))?;
        let reference = reference.map_err(|e| JudgeError::Internal(e.to_string()))?;

        let reference = match reference {
            Ok(r) => r,
            Err(RunFailure::Run(e)) => return Err(JudgeError::ReferenceRun(problem.slug.clone(), e)),
            Err(RunFailure::Extract(e)) => {
                return Err(JudgeError::CorruptReference(problem.slug.clone(), e))
            }
        };

        let user = match user {
            Ok(r) => r,
            Err(failure) => {
                let failure = classify_user_failure(failure)?;
                tracing::debug!(?failure, "Submitted query rejected");
                return Ok(Judgement::Rejected {
                    title: problem.title.clone(),
                    failure,
                });
            }
        };

        tracing::debug!(stage = %Stage::Comparing);
        let is_correct = compare_results(&user, &reference);
        Ok(Judgement::Compared {
            title: problem.title.clone(),
            verdict: ComparisonVerdict {
                is_correct,
                user_result: user,
                reference_result: reference,
            },
        })
    }

    fn spawn_run(
        &self,
        problem: &ProblemSpec,
        query: &str,
        tag: String,
    ) -> JoinHandle<Result<StructuredResult, RunFailure>> {
        let orchestrator = self.orchestrator.clone();
        let setup = problem.setup.clone();
        let query = query.to_owned();
        let span = tracing::info_span!("sandbox_run", %tag);
        self.runs.spawn(
            async move {
                let raw = orchestrator
                    .run(&setup, &query, &tag)
                    .await
                    .map_err(RunFailure::Run)?;
                let text = raw.text();
                tracing::trace!(exit_code = raw.exit_code, %text, "Sandbox output");
                extract(&text).map_err(RunFailure::Extract)
            }
            .instrument(span),
        )
    }
}

fn classify_user_failure(failure: RunFailure) -> Result<UserFailure, JudgeError> {
    Ok(match failure {
        RunFailure::Run(RunError::Timeout(limit)) => UserFailure::Timeout(limit),
        RunFailure::Run(RunError::ResourceLimitExceeded) => UserFailure::MemoryLimitExceeded,
        RunFailure::Run(e @ RunError::Provisioning(_)) => return Err(JudgeError::Provisioning(e)),
        RunFailure::Extract(ExtractError::NoStructuredOutput(msg)) => UserFailure::SqlError(msg),
        RunFailure::Extract(ExtractError::MalformedStructuredOutput { payload, reason }) => {
            UserFailure::MalformedOutput { payload, reason }
        }
    })
}

/// The outbound shape of a judgement.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionResponse {
    #[serde(rename_all = "camelCase")]
    Success {
        is_correct: bool,
        user_output: StructuredResult,
        expected_output: StructuredResult,
        title: String,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        is_correct: bool,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_output: Option<StructuredResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        expected_output: Option<StructuredResult>,
    },
    SystemError {
        message: String,
    },
}

impl SubmissionResponse {
    pub fn is_system_error(&self) -> bool {
        matches!(self, SubmissionResponse::SystemError { .. })
    }
}

impl From<Result<Judgement, JudgeError>> for SubmissionResponse {
    fn from(res: Result<Judgement, JudgeError>) -> Self {
        match res {
            Ok(Judgement::Compared { title, verdict }) if verdict.is_correct => {
                SubmissionResponse::Success {
                    is_correct: true,
                    user_output: verdict.user_result,
                    expected_output: verdict.reference_result,
                    title,
                }
            }
            Ok(Judgement::Compared { verdict, .. }) => SubmissionResponse::Error {
                is_correct: false,
                message: MISMATCH_MESSAGE.into(),
                user_output: Some(verdict.user_result),
                expected_output: Some(verdict.reference_result),
            },
            Ok(Judgement::Rejected { failure, .. }) => SubmissionResponse::Error {
                is_correct: false,
                message: failure.message(),
                user_output: None,
                expected_output: None,
            },
            Err(JudgeError::ProblemNotFound(_)) => SubmissionResponse::SystemError {
                message: PROBLEM_NOT_FOUND_MESSAGE.into(),
            },
            // Details were logged by `Judge::judge`; never hand them out.
            Err(_) => SubmissionResponse::SystemError {
                message: SYSTEM_ERROR_MESSAGE.into(),
            },
        }
    }
}
