//! LeakBench CLI
//!
//! The `leakbench` command runs the leakage benchmark.
//!
//! ## Commands
//!
//! - `run`: grade the agent (or the local baseline) over several episodes
//! - `calibrate`: derive `pass_threshold` from a sample of episode AUCs

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn, Level};

use leakbench_core::{
    collect_agent_aucs, collect_local_aucs, quantile_threshold, write_threshold, AnthropicProvider,
    EpisodeRunner, HarnessConfig, PythonLauncher, RunSummary, SyntheticLeakProvider,
    DEFAULT_CONFIG_FILE,
};

#[derive(Parser)]
#[command(name = "leakbench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Benchmark whether an LLM agent builds leakage-free models", long_about = None)]
struct Cli {
    /// Surface every step, assistant message and code fragment
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "LEAKBENCH_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// The leakage-free baseline, no model calls
    Local,
    /// The language-model agent
    Agent,
}

#[derive(Subcommand)]
enum Commands {
    /// Run and grade a batch of episodes
    Run {
        #[arg(long, value_enum, default_value_t = Mode::Local)]
        mode: Mode,

        /// Number of episodes (default: num_runs from the config)
        #[arg(long)]
        runs: Option<u32>,

        /// Model identifier (overrides config and MODEL)
        #[arg(long)]
        model: Option<String>,

        /// Write the per-episode reports as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Calibrate pass_threshold from repeated episodes
    Calibrate {
        #[arg(long, value_enum, default_value_t = Mode::Local)]
        mode: Mode,

        #[arg(long, default_value = "20")]
        runs: u32,

        /// Quantile of the AUC sample used as the threshold
        #[arg(long, default_value = "0.8")]
        quantile: f64,

        /// Model identifier (overrides config and MODEL)
        #[arg(long)]
        model: Option<String>,

        /// Print the rewritten config instead of writing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    leakbench_core::init_tracing(cli.json, level);

    let mut config = HarnessConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.verbose |= cli.verbose;

    let abort = install_abort_handler();

    match cli.command {
        Commands::Run {
            mode,
            runs,
            model,
            report,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            let runs = runs.unwrap_or(config.num_runs);
            cmd_run(&config, mode, runs, report.as_deref(), abort).await
        }
        Commands::Calibrate {
            mode,
            runs,
            quantile,
            model,
            dry_run,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            cmd_calibrate(&config, &cli.config, mode, runs, quantile, dry_run, abort).await
        }
    }
}

/// Ctrl-C raises the abort signal seen by the sandbox and the run loop.
fn install_abort_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting");
            tx.send(true).ok();
        }
    });
    rx
}

async fn cmd_run(
    config: &HarnessConfig,
    mode: Mode,
    runs: u32,
    report_path: Option<&Path>,
    abort: watch::Receiver<bool>,
) -> Result<()> {
    let problems = SyntheticLeakProvider::new(config.leaks);
    let runner = EpisodeRunner::new(config, &problems).with_abort_signal(abort.clone());
    let mut summary = RunSummary::default();

    match mode {
        Mode::Local => {
            for i in 1..=runs {
                let report = runner.run_local_episode(i)?;
                println!("{}", report.summary_line());
                summary.push(report);
            }
        }
        Mode::Agent => {
            let provider = AnthropicProvider::from_env().context("configuring model provider")?;
            let launcher = PythonLauncher::new(config.python_command.clone());
            info!(model = %config.model, runs = runs, "starting agent runs");
            for i in 1..=runs {
                if *abort.borrow() {
                    bail!("aborted before run {i}");
                }
                let report = runner
                    .run_agent_episode(&provider, &launcher, i)
                    .await
                    .with_context(|| format!("agent run {i}"))?;
                println!("{}", report.summary_line());
                summary.push(report);
            }
        }
    }

    println!("{}", summary.summary_line());

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

async fn cmd_calibrate(
    config: &HarnessConfig,
    config_path: &Path,
    mode: Mode,
    runs: u32,
    quantile: f64,
    dry_run: bool,
    abort: watch::Receiver<bool>,
) -> Result<()> {
    let problems = SyntheticLeakProvider::new(config.leaks);
    let runner = EpisodeRunner::new(config, &problems).with_abort_signal(abort);

    let aucs = match mode {
        Mode::Local => collect_local_aucs(&runner, runs)?,
        Mode::Agent => {
            let provider = AnthropicProvider::from_env().context("configuring model provider")?;
            let launcher = PythonLauncher::new(config.python_command.clone());
            collect_agent_aucs(&runner, &provider, &launcher, runs).await?
        }
    };

    let Some(threshold) = quantile_threshold(&aucs, quantile) else {
        eprintln!("No AUCs collected; aborting.");
        std::process::exit(2);
    };

    let mut sorted = aucs.clone();
    sorted.sort_by(f64::total_cmp);
    println!("Runs: {}", sorted.len());
    println!("AUCs sample: {:?} ...", &sorted[..sorted.len().min(10)]);
    println!("p{} = {threshold:.4}", (quantile * 100.0).round() as i64);

    let updated = write_threshold(config_path, threshold, dry_run)?;
    if dry_run {
        println!("--- DRY RUN ---");
        println!("{updated}");
    } else {
        println!(
            "Updated pass_threshold in {} to {threshold:.4}",
            config_path.display()
        );
    }
    Ok(())
}
