//! Resumable task-iteration loop.
//!
//! Reads a JSON backlog (`plans/prd.json` by default), hands one task at a time
//! to a worker command, and records every iteration in `progress.jsonl`. All
//! state lives in those two files, so an interrupted run resumes where it
//! stopped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use taskloop::controller::{IterationReport, LoopSettings, run_loop};
use taskloop::core::types::Attribution;
use taskloop::exit_codes;
use taskloop::io::backlog_store::{BacklogError, BacklogStore};
use taskloop::io::config::{ConfigError, DEFAULT_CONFIG_FILE, LoopConfig, load_config};
use taskloop::io::progress_log::ProgressLog;
use taskloop::io::template::CommandTemplate;
use taskloop::io::worker::ShellWorker;
use taskloop::logging;
use taskloop::select::{SelectOutcome, select_from_path};
use taskloop::status::{render_status, status_report};
use taskloop::validate::validate_backlog;

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Drive a worker command through a task backlog until it is done"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the loop until the backlog is done or a limit is reached.
    Run(RunArgs),
    /// Print the id of the next pending task.
    ///
    /// Failed tasks are ignored unless `--retry` is given, in which case the
    /// choice matches what `taskloop run` would pick next.
    Select(SelectArgs),
    /// Show task statuses and the most recent progress entries.
    Status {
        #[command(flatten)]
        paths: PathArgs,
        /// Path to the progress log.
        #[arg(long)]
        progress: Option<PathBuf>,
        /// Number of progress entries to show.
        #[arg(long, default_value_t = 10)]
        tail: usize,
    },
    /// Check the backlog against the schema and invariants (unique, non-empty ids).
    Validate(PathArgs),
}

#[derive(Args)]
struct PathArgs {
    /// Path to the backlog file.
    #[arg(long)]
    backlog: Option<PathBuf>,
    /// Config file (defaults to ./taskloop.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct SelectArgs {
    #[command(flatten)]
    paths: PathArgs,
    /// Apply the configured retry policy, so retryable failed tasks count.
    #[arg(long)]
    retry: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Maximum number of worker invocations in this run.
    #[arg(long)]
    max_iterations: u32,
    /// Path to the backlog file.
    #[arg(long)]
    backlog: Option<PathBuf>,
    /// Path to the progress log.
    #[arg(long)]
    progress: Option<PathBuf>,
    /// Worker command template, run with `sh -c`.
    #[arg(long)]
    command: Option<String>,
    /// Completion marker the worker prints when everything is done.
    #[arg(long)]
    marker: Option<String>,
    /// Per-iteration timeout in seconds.
    #[arg(long, conflicts_with = "no_timeout")]
    timeout_secs: Option<u64>,
    /// Disable the per-iteration timeout.
    #[arg(long)]
    no_timeout: bool,
    /// Consecutive failures after which a task is given up on.
    #[arg(long)]
    max_failures: Option<u32>,
    /// Leave failed tasks alone instead of retrying them.
    #[arg(long)]
    no_retry: bool,
    /// Exit 1 when only failed tasks that may not be retried are left.
    #[arg(long)]
    fail_when_blocked: bool,
    /// How an invocation is credited to its task (exit-code or task-marker).
    #[arg(long)]
    attribution: Option<Attribution>,
    /// Config file (defaults to ./taskloop.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            classify_error(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Select(args) => cmd_select(&args),
        Command::Status {
            paths,
            progress,
            tail,
        } => cmd_status(&paths, progress, tail),
        Command::Validate(paths) => cmd_validate(&paths),
    }
}

/// Configuration problems and unusable backlogs exit 2; everything else exits 1.
fn classify_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_codes::INVALID;
        }
        if let Some(BacklogError::NotFound { .. } | BacklogError::Corrupt { .. }) =
            cause.downcast_ref::<BacklogError>()
        {
            return exit_codes::INVALID;
        }
    }
    exit_codes::FAILURE
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let config = resolve_run_config(args)?;
    let settings = LoopSettings::from_config(&config, args.max_iterations)?;
    let command = config.worker.command.as_deref().unwrap_or_default();
    let template = CommandTemplate::new(command)
        .map_err(|err| ConfigError::new(format!("{err:#}")))?;
    debug!(?config, "resolved configuration");

    let mut store = BacklogStore::load(&config.backlog_path)?;
    let mut log = ProgressLog::open(&config.progress_path)
        .with_context(|| format!("open {}", config.progress_path.display()))?;
    let worker = ShellWorker::new(
        template,
        config.worker.workdir.clone(),
        config.worker.limits(),
    );

    let outcome = run_loop(&mut store, &mut log, &worker, &settings, print_iteration)?;
    let verdict = if outcome.stop.is_success() {
        "done"
    } else {
        "stopped"
    };
    println!(
        "{verdict}: {} ({} iterations this run)",
        outcome.stop, outcome.iterations
    );
    Ok(outcome.stop.exit_code())
}

fn print_iteration(report: &IterationReport) {
    let exit = report
        .exit_code
        .map_or_else(|| "no exit code".to_string(), |code| format!("exit {code}"));
    println!(
        "[iteration {}] {}: {} ({exit}, {:.1}s) -> {}",
        report.iteration,
        report.task_id,
        report.outcome.as_str(),
        report.duration.as_secs_f64(),
        report.status.as_str()
    );
}

fn cmd_select(args: &SelectArgs) -> Result<i32> {
    let config = resolve_paths(&args.paths)?;
    let retry = args.retry.then(|| config.retry_policy());
    let backlog_path = config.backlog_path;
    match select_from_path(&backlog_path, retry.as_ref())? {
        SelectOutcome::Pending(task) => {
            println!("{}", task.id);
            Ok(exit_codes::OK)
        }
        SelectOutcome::NonePending => {
            eprintln!("no selectable tasks in {}", backlog_path.display());
            Ok(exit_codes::NONE_PENDING)
        }
    }
}

fn cmd_status(paths: &PathArgs, progress: Option<PathBuf>, tail: usize) -> Result<i32> {
    let mut config = resolve_paths(paths)?;
    if let Some(progress) = progress {
        config.progress_path = progress;
    }
    let report = status_report(&config.backlog_path, &config.progress_path, tail)?;
    print!("{}", render_status(&report));
    Ok(exit_codes::OK)
}

fn cmd_validate(paths: &PathArgs) -> Result<i32> {
    let backlog_path = resolve_paths(paths)?.backlog_path;
    let summary = validate_backlog(&backlog_path)?;
    println!(
        "ok: {} ({} items: {} passed, {} pending, {} failed)",
        backlog_path.display(),
        summary.total,
        summary.passed,
        summary.pending,
        summary.failed
    );
    Ok(exit_codes::OK)
}

fn load_base_config(path: Option<&Path>) -> Result<LoopConfig, ConfigError> {
    match path {
        Some(path) => load_config(path, true),
        None => load_config(Path::new(DEFAULT_CONFIG_FILE), false),
    }
}

fn resolve_paths(paths: &PathArgs) -> Result<LoopConfig, ConfigError> {
    let mut config = load_base_config(paths.config.as_deref())?;
    if let Some(backlog) = &paths.backlog {
        config.backlog_path = backlog.clone();
    }
    Ok(config)
}

/// Config file values with command-line flags applied on top, validated.
fn resolve_run_config(args: &RunArgs) -> Result<LoopConfig, ConfigError> {
    let mut config = load_base_config(args.config.as_deref())?;
    if let Some(backlog) = &args.backlog {
        config.backlog_path = backlog.clone();
    }
    if let Some(progress) = &args.progress {
        config.progress_path = progress.clone();
    }
    if let Some(command) = &args.command {
        config.worker.command = Some(command.clone());
    }
    if let Some(marker) = &args.marker {
        config.completion_marker = marker.clone();
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.worker.timeout_secs = timeout_secs;
    }
    if args.no_timeout {
        config.worker.timeout_secs = 0;
    }
    if let Some(max_failures) = args.max_failures {
        config.max_consecutive_failures = max_failures;
    }
    if args.no_retry {
        config.retry_failed = false;
    }
    if args.fail_when_blocked {
        config.fail_when_blocked = true;
    }
    if let Some(attribution) = args.attribution {
        config.attribution = attribution;
    }
    config.validate()?;
    Ok(config)
}
