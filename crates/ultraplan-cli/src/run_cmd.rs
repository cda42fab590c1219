//! `ultraplan run <plan.toml>` -- drive a plan through the full
//! execution/consolidation/synthesis/revision pipeline, pausing for an
//! interactive operator decision whenever the engine asks for one.
//!
//! A `decide` subcommand is documented in the specification as a
//! separate entry point, but since `ExecutionState` lives only in this
//! process's memory, there is nothing for a second invocation to attach
//! to; the decision is instead taken inline here, the in-process
//! equivalent of a cross-process resume.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ultraplan_core::config::{CliOverrides, EngineConfig};
use ultraplan_core::coordinator::{PhaseCoordinator, RunOutcome};
use ultraplan_core::engine::ExecutionEngine;
use ultraplan_core::git::GitOps;
use ultraplan_core::instance::{InstanceHost, ProcessInstanceHost};
use ultraplan_core::plan::load_plan_from_toml;

use crate::config as cli_config;
use crate::observer::CliObserver;

pub struct RunOptions {
    pub max_parallel: Option<usize>,
    pub harness_cmd: Option<String>,
    pub no_synthesis: bool,
    pub repo: Option<String>,
    pub worktree_base: Option<String>,
}

pub async fn run_plan(plan_path: &Path, options: RunOptions) -> Result<()> {
    let plan = load_plan_from_toml(plan_path)
        .with_context(|| format!("failed to load plan file: {}", plan_path.display()))?;

    let config_file = cli_config::load()?;
    let overrides = CliOverrides {
        max_parallel: options.max_parallel,
        harness_command: options.harness_cmd,
        synthesis_enabled: if options.no_synthesis { Some(false) } else { None },
    };
    let config: EngineConfig = ultraplan_core::config::resolve(&overrides, config_file.as_ref());

    let repo_path = options.repo.map(Into::into).unwrap_or_else(|| std::env::current_dir().unwrap());
    let worktree_base = options.worktree_base.map(Into::into);
    let git = GitOps::new(repo_path, worktree_base).context("failed to open repository")?;

    let host: Arc<dyn InstanceHost> = Arc::new(ProcessInstanceHost::new(config.harness_command.clone()));

    let observer: Arc<dyn ultraplan_core::observer::SessionObserver> = Arc::new(CliObserver);
    let engine = Arc::new(
        ExecutionEngine::new(plan, config.clone(), git, Arc::clone(&host), Some(Arc::clone(&observer)))
            .context("failed to construct execution engine")?,
    );

    let cancel = engine.cancel_token();
    spawn_ctrl_c_handler(cancel.clone());

    let coordinator = PhaseCoordinator::new(Arc::clone(&engine), config, host, Some(observer));

    let mut outcome = coordinator.run(cancel.clone()).await?;
    loop {
        match outcome {
            RunOutcome::Complete => {
                return Ok(());
            }
            RunOutcome::RevisionBudgetExhausted => {
                anyhow::bail!("revision budget exhausted with synthesis still reporting issues");
            }
            RunOutcome::AwaitingSynthesisApproval => {
                if prompt_yes_no("synthesis found nothing outstanding; finish run?").await? {
                    coordinator.approve_synthesis();
                    return Ok(());
                }
                anyhow::bail!("run left awaiting synthesis approval");
            }
            RunOutcome::AwaitingDecision => {
                resolve_decision(&engine).await?;
                outcome = coordinator.resume(cancel.clone()).await?;
            }
            RunOutcome::AwaitingConflictResolution => {
                resolve_conflict(&engine).await?;
                outcome = coordinator.resume(cancel.clone()).await?;
            }
        }
    }
}

async fn resolve_conflict(engine: &Arc<ExecutionEngine>) -> Result<()> {
    let info = engine
        .conflict_info()
        .await
        .ok_or_else(|| anyhow::anyhow!("engine reported AwaitingConflictResolution with no pending conflict"))?;

    println!();
    println!("consolidation paused: {info}");
    println!("resolve the conflict markers on disk in the worktree above, `git add` the result,");
    println!("then confirm to continue the cherry-pick (leave the changes uncommitted).");

    loop {
        let choice = prompt_line("continue? [y]es / [a]bort run > ").await?;
        match choice.trim().to_lowercase().as_str() {
            "y" | "yes" => return engine.resume_consolidation().await.map_err(Into::into),
            "a" | "abort" => anyhow::bail!("operator declined to resolve consolidation conflict"),
            other => println!("unrecognized choice: {other:?} (expected y/a)"),
        }
    }
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nreceived interrupt, cancelling run...");
            cancel.cancel();
        }
    });
}

async fn resolve_decision(engine: &Arc<ExecutionEngine>) -> Result<()> {
    let decision = engine
        .group_decision()
        .await
        .ok_or_else(|| anyhow::anyhow!("engine reported AwaitingDecision with no pending decision"))?;

    println!();
    println!("group {} finished with a partial failure:", decision.group_index + 1);
    println!("  succeeded: {}", decision.succeeded_tasks.join(", "));
    println!("  failed:    {}", decision.failed_tasks.join(", "));
    println!();
    println!("choose: [r]esume with partial work, [t]ry failed tasks again, [g]ive up");

    loop {
        let choice = prompt_line("> ").await?;
        match choice.trim().to_lowercase().as_str() {
            "r" | "resume" => return engine.resume_with_partial_work().await.map_err(Into::into),
            "t" | "retry" => return engine.retry_failed_tasks().await.map_err(Into::into),
            "g" | "give-up" | "giveup" => {
                anyhow::bail!("operator declined to resolve group {} decision", decision.group_index + 1)
            }
            other => println!("unrecognized choice: {other:?} (expected r/t/g)"),
        }
    }
}

async fn prompt_yes_no(question: &str) -> Result<bool> {
    loop {
        let line = prompt_line(&format!("{question} [y/n] ")).await?;
        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("please answer y or n"),
        }
    }
}

async fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush().ok();
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok::<_, std::io::Error>(line)
    })
    .await
    .context("stdin reader task panicked")?
    .context("failed to read from stdin")
}
