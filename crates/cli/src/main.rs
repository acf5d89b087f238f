//! toolwarden CLI — the main entry point.
//!
//! Commands:
//! - `hook`     — Validate one hook event read from stdin
//! - `plugins`  — List loaded plugins and load errors
//! - `rules`    — List compiled rules in evaluation order
//! - `doctor`   — Build everything and report construction errors
//!
//! Logs go to stderr; stdout is left to command output.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "toolwarden",
    about = "toolwarden — policy hooks for AI coding agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Global config file (default: $TOOLWARDEN_CONFIG or ~/.toolwarden/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Project root (plugins directory, project config, git working tree)
    #[arg(short, long, global = true, env = "CLAUDE_PROJECT_DIR")]
    project: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a hook event from stdin (exit 2 blocks the tool call)
    Hook {
        /// Overall deadline for validation
        #[arg(long, default_value_t = commands::hook::DEFAULT_TIMEOUT_MS)]
        timeout_ms: u64,
    },

    /// List loaded plugins
    Plugins,

    /// List rules in evaluation order
    Rules,

    /// Diagnose configuration, rules and plugins
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let env = commands::Env::new(cli.config, cli.project)?;

    match cli.command {
        Commands::Hook { timeout_ms } => commands::hook::run(&env, timeout_ms).await,
        Commands::Plugins => commands::plugins::run(&env).await,
        Commands::Rules => commands::rules::run(&env),
        Commands::Doctor => commands::doctor::run(&env).await,
    }
}
