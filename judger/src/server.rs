//! The HTTP face of the judger. Routing only; everything interesting happens
//! in [`crate::judge`].

use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::{
    catalog::ProblemGroup,
    judge::{Judge, JudgeError, JudgeRequest, SubmissionResponse},
};

pub fn router(judge: Judge) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/problems", get(list_problems))
        .route("/api/problems/:slug", get(problem_detail))
        .route("/api/run", post(run_submission))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<Body>| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        path = %req.uri().path(),
                    )
                })
                .on_response(|res: &Response, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = res.status().as_u16(),
                        latency_ms = latency.as_millis() as u64,
                        "request completed"
                    );
                }),
        )
        .with_state(judge)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    judge: Judge,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let socket: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid bind address {}", addr))?;
    let listener = TcpListener::bind(socket)
        .await
        .with_context(|| format!("Failed to bind {}", socket))?;

    tracing::info!("sqljudge listening on http://{}", socket);

    axum::serve(listener, router(judge))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

pub(crate) async fn list_problems(State(judge): State<Judge>) -> Json<Vec<ProblemGroup>> {
    Json(judge.catalog().grouped())
}

pub(crate) async fn problem_detail(
    State(judge): State<Judge>,
    Path(slug): Path<String>,
) -> Response {
    match judge.catalog().get_by_slug(&slug) {
        Some(problem) => Json(problem.detail()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "message": format!("Problem with slug '{}' not found", slug),
            })),
        )
            .into_response(),
    }
}

pub(crate) async fn run_submission(
    State(judge): State<Judge>,
    Json(req): Json<JudgeRequest>,
) -> Response {
    let res = judge.judge(&req).await;
    let status = match &res {
        Ok(_) => StatusCode::OK,
        Err(JudgeError::ProblemNotFound(_)) => StatusCode::NOT_FOUND,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(SubmissionResponse::from(res))).into_response()
}
