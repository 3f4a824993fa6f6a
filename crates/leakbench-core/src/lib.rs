//! LeakBench Core Library
//!
//! Runs a tool-using language-model agent against synthetic classification
//! problems with planted leak columns, sandboxes and meters its code, and
//! grades whatever it submits.

pub mod agent;
pub mod baseline;
pub mod calibration;
pub mod config;
pub mod domain;
pub mod episode;
pub mod fakes;
pub mod grading;
pub mod model;
pub mod obs;
pub mod registry;
pub mod sandbox;
pub mod synthetic;
pub mod telemetry;
pub mod tools;

pub use agent::{AgentLoop, AgentOutcome, AgentSettings, DialogueState, Termination};
pub use baseline::{build_baseline_submission, BaselineModel};
pub use calibration::{
    collect_agent_aucs, collect_local_aucs, quantile_threshold, write_threshold, CalibrationError,
};
pub use config::{ConfigError, HarnessConfig, LeakToggles, DEFAULT_CONFIG_FILE};
pub use domain::{
    Column, ColumnData, HarnessError, LeakSpec, ProblemInstance, ProblemProvider, Result, Table,
    TableError,
};
pub use episode::{build_prompt, EpisodeMode, EpisodeReport, EpisodeRunner, RunSummary};
pub use grading::{coerce_probabilities, Check, CoercionError, Grader, GradingResult};
pub use model::{
    call_with_retry, AnthropicConfig, AnthropicProvider, ModelProvider, ProviderError,
    ProviderErrorKind, RetryPolicy,
};
pub use registry::{SubmissionRegistry, SubmitOutcome, PROBABILITY_KEYS};
pub use sandbox::{
    ExecutionReport, Kernel, KernelLauncher, PrintQuota, PythonLauncher, SandboxError,
    SandboxExecutor,
};
pub use synthetic::SyntheticLeakProvider;
pub use telemetry::init_tracing;
pub use tools::{ToolHandler, ToolOutcome, ToolTable};
