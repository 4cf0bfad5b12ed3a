use std::{path::Path, process::exit, sync::Arc};

use anyhow::Context;
use clap::Parser;
use sql_judger::{
    catalog::{self, Catalog},
    config::JudgerConfig,
    judge::{Judge, JudgeRequest, Judgement, SubmissionResponse},
    runner::{docker::DockerRuntime, Orchestrator},
    server,
    verify::{compare::canonical, diff::diff},
};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

mod opt;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opt = opt::Opts::parse();
    match run(opt).await {
        Ok(code) => exit(code),
        Err(e) => {
            tracing::error!("{:?}", e);
            exit(101);
        }
    }
}

async fn run(opt: opt::Opts) -> anyhow::Result<i32> {
    let mut cfg = JudgerConfig::load(opt.opt.config.as_deref())?;
    if let Some(problems) = opt.opt.problems {
        cfg.problems = problems;
    }
    let catalog = catalog::install(Catalog::load(&cfg.problems)?)?;

    match opt.cmd {
        opt::SubCmd::Problems => {
            for group in catalog.grouped() {
                println!("{}", group.category);
                for p in group.problems {
                    println!("  {:<32} {:?}\t{}", p.slug, p.difficulty, p.title);
                }
            }
            Ok(0)
        }
        opt::SubCmd::Check(cmd) => {
            let judge = make_judge(&cfg, catalog).await?;
            check(&judge, cmd).await
        }
        opt::SubCmd::Serve(cmd) => {
            let judge = make_judge(&cfg, catalog).await?;
            let bind = cmd.bind.unwrap_or(cfg.bind);
            let res = server::serve(&bind, judge.clone(), shutdown_signal()).await;
            judge.shutdown().await;
            res?;
            Ok(0)
        }
    }
}

async fn make_judge(cfg: &JudgerConfig, catalog: Arc<Catalog>) -> anyhow::Result<Judge> {
    let runtime =
        DockerRuntime::connect_with_local_defaults().context("Failed to connect to docker")?;
    runtime
        .check_ready(&cfg.sandbox.image)
        .await
        .with_context(|| format!("Sandbox image {} is not usable", cfg.sandbox.image))?;
    let swept = runtime
        .remove_leftovers()
        .await
        .context("Failed to remove leftover sandboxes")?;
    if swept > 0 {
        tracing::warn!("Removed {} sandboxes left behind by an earlier run", swept);
    }

    let orchestrator = Orchestrator::new(
        Arc::new(runtime),
        cfg.sandbox.image.as_str(),
        cfg.sandbox.command.clone(),
        cfg.sandbox.limits(),
    );
    Ok(Judge::new(orchestrator, catalog))
}

async fn check(judge: &Judge, cmd: opt::CheckSubCmd) -> anyhow::Result<i32> {
    let query = read_query(&cmd.query).await?;
    let req = JudgeRequest {
        submitted_query: query,
        problem_slug: cmd.slug,
    };

    let res = judge.judge(&req).await;
    let correct = matches!(&res, Ok(j) if j.is_correct());
    let line_diff = match &res {
        Ok(Judgement::Compared { verdict, .. }) if !verdict.is_correct => Some(diff(
            &canonical(&verdict.user_result).join("\n"),
            &canonical(&verdict.reference_result).join("\n"),
        )),
        _ => None,
    };

    let response = SubmissionResponse::from(res);
    println!("{}", serde_json::to_string_pretty(&response)?);
    if let Some(d) = line_diff {
        println!("\nDifference (sorted rows, - yours, + expected):\n{}", d);
    }

    let code = if correct {
        0
    } else if response.is_system_error() {
        2
    } else {
        1
    };
    Ok(code)
}

async fn read_query(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut s = String::new();
        tokio::io::stdin()
            .read_to_string(&mut s)
            .await
            .context("Failed to read query from stdin")?;
        Ok(s)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read query file {}", path.display()))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to set termination handler: {}", e);
        futures::future::pending::<()>().await;
    }
    tracing::warn!("Waiting for running judgements to complete...");
}
