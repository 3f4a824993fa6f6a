//! Episode orchestration: problem → (agent | baseline) → grade.
//!
//! Every episode gets its own problem instance, submission registry, kernel
//! and dialogue. Nothing mutable is shared between episodes.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{AgentLoop, AgentSettings, Termination};
use crate::baseline::build_baseline_submission;
use crate::config::HarnessConfig;
use crate::domain::{ProblemInstance, ProblemProvider, Result};
use crate::grading::{Check, Grader, GradingResult};
use crate::model::ModelProvider;
use crate::obs::{self, EpisodeSpan};
use crate::registry::SubmissionRegistry;
use crate::sandbox::{KernelLauncher, NamespaceSeed, PrintQuota, SandboxExecutor};
use crate::tools::{ToolTable, PYTHON_TOOL, SUBMIT_TOOL};

/// Seed offset for agent episodes.
pub const AGENT_SEED_BASE: u64 = 1000;
/// Seed offset for local baseline episodes.
pub const LOCAL_SEED_BASE: u64 = 42;

/// What produced the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeMode {
    Agent,
    Local,
}

impl EpisodeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeMode::Agent => "agent",
            EpisodeMode::Local => "local",
        }
    }
}

/// Record of one graded episode.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeReport {
    pub episode_id: String,
    pub run_index: u32,
    pub mode: EpisodeMode,
    pub seed: u64,
    /// `None` for local episodes.
    pub termination: Option<Termination>,
    pub steps: u32,
    pub result: GradingResult,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl EpisodeReport {
    /// `Run i: passed=<bool> auc=<x.xxx> fails=[...]`
    pub fn summary_line(&self) -> String {
        let fails: Vec<&str> = self
            .result
            .failed_checks()
            .into_iter()
            .map(Check::as_str)
            .collect();
        format!(
            "Run {}: passed={} auc={:.3} fails=[{}]",
            self.run_index,
            self.result.passed,
            self.result.auc,
            fails.join(", ")
        )
    }
}

/// Pass statistics over a batch of episodes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<EpisodeReport>,
}

impl RunSummary {
    pub fn push(&mut self, report: EpisodeReport) {
        self.reports.push(report);
    }

    pub fn runs(&self) -> usize {
        self.reports.len()
    }

    pub fn passes(&self) -> usize {
        self.reports.iter().filter(|r| r.result.passed).count()
    }

    pub fn pass_rate(&self) -> f64 {
        if self.reports.is_empty() {
            0.0
        } else {
            self.passes() as f64 / self.runs() as f64
        }
    }

    /// `Pass rate: p/n = r`
    pub fn summary_line(&self) -> String {
        format!(
            "Pass rate: {}/{} = {:.2}",
            self.passes(),
            self.runs(),
            self.pass_rate()
        )
    }
}

/// Task prompt for the agent.
pub fn build_prompt(present_leaks: &[String], threshold: f64) -> String {
    format!(
        "You have two pandas DataFrames in your Python namespace: train_df and test_df.\n\
         Task: build a leakage-free baseline model and return predicted probabilities for test_df.\n\
         These columns leak the label and must ALL be dropped (also listed in present_leaks): {present_leaks:?}.\n\
         The label column is 'target'; never use it as a feature.\n\
         Fit all preprocessing on train_df only:\n\
         \x20 numeric -> median imputation + standard scaling; categorical -> one-hot encoding that ignores unknown categories.\n\
         A simple classifier such as LogisticRegression is enough. Return positive-class PROBABILITIES in test_df row order.\n\
         You can submit in either of two ways:\n\
         \x20 A) inside {PYTHON_TOOL}: submit_answer({{'y_pred_proba': y_proba, 'pipeline': pipeline}})\n\
         \x20 B) with the {SUBMIT_TOOL} tool: {{\"answer\": {{\"y_pred_proba\": [...], \"pipeline\": \"...\"}}}}\n\
         submit_answer is already defined in the Python namespace; do not import it.\n\
         Success means ROC AUC >= {threshold:.2}. Submit once, then STOP.\n"
    )
}

/// Runs episodes against one configuration.
pub struct EpisodeRunner<'a> {
    config: &'a HarnessConfig,
    problems: &'a dyn ProblemProvider,
    grader: Grader,
    abort: Option<watch::Receiver<bool>>,
}

impl<'a> EpisodeRunner<'a> {
    pub fn new(config: &'a HarnessConfig, problems: &'a dyn ProblemProvider) -> Self {
        Self {
            config,
            problems,
            grader: Grader::new(config.pass_threshold),
            abort: None,
        }
    }

    /// Abort in-flight sandbox execution when the channel turns `true`.
    pub fn with_abort_signal(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn grader(&self) -> &Grader {
        &self.grader
    }

    fn make_problem(&self, seed: u64) -> Result<ProblemInstance> {
        self.problems
            .make_problem(seed, self.config.n_train, self.config.n_test)
    }

    /// Drive the agent through one episode seeded with `1000 + run_index`.
    pub async fn run_agent_episode(
        &self,
        provider: &dyn ModelProvider,
        launcher: &dyn KernelLauncher,
        run_index: u32,
    ) -> Result<EpisodeReport> {
        let episode_id = Uuid::new_v4().to_string();
        let span = obs::episode_span(&episode_id, run_index, EpisodeMode::Agent.as_str());
        self.drive_agent(provider, launcher, run_index, episode_id)
            .instrument(span)
            .await
    }

    async fn drive_agent(
        &self,
        provider: &dyn ModelProvider,
        launcher: &dyn KernelLauncher,
        run_index: u32,
        episode_id: String,
    ) -> Result<EpisodeReport> {
        let seed = AGENT_SEED_BASE + u64::from(run_index);
        let started_at = Utc::now();
        let clock = Instant::now();

        let problem = self.make_problem(seed)?;
        let present_leaks = problem.present_leaks();
        obs::emit_episode_started(seed, problem.train.n_rows(), problem.test.n_rows(), &present_leaks);

        let registry = Arc::new(SubmissionRegistry::new());
        let kernel = launcher.launch(&NamespaceSeed::for_problem(&problem)).await?;
        let quota = PrintQuota::new(self.config.print_quota(problem.train.n_columns()));
        let mut executor = SandboxExecutor::new(
            kernel,
            quota,
            self.config.stdout_max_chars,
            registry.clone(),
        );
        if let Some(abort) = &self.abort {
            executor = executor.with_abort_signal(abort.clone());
        }

        let prompt = build_prompt(&present_leaks, self.grader.threshold());
        let agent = AgentLoop::new(provider, AgentSettings::from_config(self.config));
        let outcome = match ToolTable::standard(&mut executor, registry.clone(), self.config.verbose) {
            Ok(mut tools) => agent.run(&prompt, &mut tools).await,
            Err(err) => Err(err),
        };
        executor.shutdown().await;
        let outcome = outcome?;

        // In-code submissions never come back through the loop.
        let submission = outcome
            .submission
            .filter(Value::is_object)
            .or_else(|| registry.pop());
        let result = match (&outcome.kernel_failure, submission) {
            (Some(reason), _) => GradingResult::format_failure(format!("kernel failed: {reason}")),
            (None, Some(answer)) if answer.is_object() => {
                self.grader.grade_problem(&answer, &problem)
            }
            _ => GradingResult::format_failure("no mapping submission was made"),
        };

        let duration_ms = clock.elapsed().as_millis() as u64;
        obs::emit_episode_graded(&result, duration_ms);
        Ok(EpisodeReport {
            episode_id,
            run_index,
            mode: EpisodeMode::Agent,
            seed,
            termination: Some(outcome.termination),
            steps: outcome.steps,
            result,
            started_at,
            duration_ms,
        })
    }

    /// Grade the leakage-free baseline on the problem seeded with
    /// `42 + run_index`.
    pub fn run_local_episode(&self, run_index: u32) -> Result<EpisodeReport> {
        self.run_baseline(LOCAL_SEED_BASE + u64::from(run_index), run_index)
    }

    /// Grade the baseline on the problem built from `seed`.
    pub fn run_baseline(&self, seed: u64, run_index: u32) -> Result<EpisodeReport> {
        let episode_id = Uuid::new_v4().to_string();
        let _span = EpisodeSpan::enter(&episode_id, run_index, EpisodeMode::Local.as_str());
        let started_at = Utc::now();
        let clock = Instant::now();

        let problem = self.make_problem(seed)?;
        obs::emit_episode_started(
            seed,
            problem.train.n_rows(),
            problem.test.n_rows(),
            &problem.present_leaks(),
        );
        let submission = build_baseline_submission(&problem);
        let result = self.grader.grade_problem(&submission, &problem);

        let duration_ms = clock.elapsed().as_millis() as u64;
        obs::emit_episode_graded(&result, duration_ms);
        Ok(EpisodeReport {
            episode_id,
            run_index,
            mode: EpisodeMode::Local,
            seed,
            termination: None,
            steps: 0,
            result,
            started_at,
            duration_ms,
        })
    }
}
