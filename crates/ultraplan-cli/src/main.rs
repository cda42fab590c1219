mod config;
mod observer;
mod run_cmd;
mod validate_cmd;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser)]
#[command(name = "ultraplan", about = "Phase execution engine for multi-agent coding plan orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter ultraplan config file (no repository required)
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Parse a plan file and check its invariants
    Validate {
        /// Path to the plan TOML file
        plan: PathBuf,
    },
    /// Run a plan to completion or to a paused decision point
    Run {
        /// Path to the plan TOML file
        plan: PathBuf,
        /// Maximum number of concurrently running tasks
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Command used to spawn each worker instance (whitespace-split)
        #[arg(long)]
        harness_cmd: Option<String>,
        /// Skip the synthesis/revision pass after execution
        #[arg(long)]
        no_synthesis: bool,
        /// Path to the git repository (defaults to the current directory)
        #[arg(long)]
        repo: Option<String>,
        /// Directory under which per-task worktrees are created
        #[arg(long)]
        worktree_base: Option<String>,
    },
    /// Print shell completion script to stdout
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(ultraplan_core::config::log_filter_directive()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            let path = config::save_default(force)?;
            println!("Config written to {}", path.display());
        }
        Commands::Validate { plan } => {
            validate_cmd::run_validate(&plan)?;
        }
        Commands::Run { plan, max_parallel, harness_cmd, no_synthesis, repo, worktree_base } => {
            run_cmd::run_plan(&plan, run_cmd::RunOptions { max_parallel, harness_cmd, no_synthesis, repo, worktree_base })
                .await?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
        }
    }

    Ok(())
}
