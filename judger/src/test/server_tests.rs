use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pretty_assertions::assert_eq;
use test_env_log::test;

use crate::{
    judge::JudgeRequest,
    server::{list_problems, problem_detail, run_submission},
};

use super::util::{make_judge, MockRuntime, REFERENCE};

fn runtime() -> Arc<MockRuntime> {
    let mut runtime = MockRuntime::new();
    runtime.when("SELEC ").returns(1).stderr("Error: syntax").finish();
    runtime.when("ORDER BY x DESC").stdout("[{\"x\":2},{\"x\":1}]").finish();
    runtime.when("BROKEN").fails_to_create().finish();
    runtime.when(REFERENCE).stdout("[{\"x\":1},{\"x\":2}]").finish();
    Arc::new(runtime)
}

async fn status_of(query: &str, slug: &str) -> StatusCode {
    let judge = make_judge(runtime());
    let req = JudgeRequest {
        submitted_query: query.into(),
        problem_slug: slug.into(),
    };
    run_submission(State(judge), Json(req)).await.status()
}

#[test(tokio::test)]
async fn test_run_status_codes() {
    assert_eq!(
        status_of("SELECT x FROM t ORDER BY x DESC;", "list-numbers").await,
        StatusCode::OK
    );
    // A broken query is still a successful request.
    assert_eq!(
        status_of("SELEC x;", "list-numbers").await,
        StatusCode::OK
    );
    assert_eq!(
        status_of("SELECT 1;", "nope").await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status_of("BROKEN", "list-numbers").await,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test(tokio::test)]
async fn test_problem_listing() {
    let judge = make_judge(runtime());
    let Json(groups) = list_problems(State(judge.clone())).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].category, "Basics");
    assert_eq!(groups[0].problems[0].slug, "list-numbers");

    let found = problem_detail(State(judge.clone()), Path("list-numbers".into())).await;
    assert_eq!(found.status(), StatusCode::OK);
    let missing = problem_detail(State(judge), Path("nope".into())).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
