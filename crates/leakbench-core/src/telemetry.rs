//! Log output for `leakbench run` and `leakbench calibrate`.
//!
//! Everything the harness logs goes to stderr: episode start and grading,
//! provider retries, kernel failures, and with `--verbose` the dialogue
//! itself (steps, assistant text, code fragments and their output). Stdout
//! carries only the per-run summary lines. `--json` switches stderr to JSON
//! lines and `RUST_LOG` overrides the level chosen by the CLI.
//!
//! [`init_tracing`] installs the global subscriber; only the first call in a
//! process takes effect.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON instead of human-readable lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // Logs go to stderr so stdout stays reserved for run results.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
