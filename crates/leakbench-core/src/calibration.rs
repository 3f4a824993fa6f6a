//! Offline calibration of the pass threshold.
//!
//! A sample of AUCs is collected from repeated episodes, a quantile of the
//! sample becomes the new `pass_threshold`, and the config file is rewritten
//! in place.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::domain::Result;
use crate::episode::EpisodeRunner;
use crate::model::ModelProvider;
use crate::sandbox::KernelLauncher;

/// Seed offset for calibration baseline episodes.
pub const CALIBRATION_SEED_BASE: u64 = 4242;

const THRESHOLD_PATTERN: &str = r"(?m)^([ \t]*pass_threshold[ \t]*=[ \t]*)([0-9]*\.?[0-9]+)";

/// Calibration failures.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("no finite AUC values were collected")]
    EmptySample,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid threshold pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// The `q` quantile of the finite values in `aucs`, by lower index.
///
/// The sorted sample is indexed at `floor(q · (n − 1))`, clamped to the
/// sample. Returns `None` when no finite value remains.
pub fn quantile_threshold(aucs: &[f64], q: f64) -> Option<f64> {
    let mut sample: Vec<f64> = aucs.iter().copied().filter(|a| !a.is_nan()).collect();
    if sample.is_empty() {
        return None;
    }
    sample.sort_by(f64::total_cmp);
    let last = sample.len() - 1;
    let idx = (q * last as f64).floor();
    let idx = if idx.is_nan() || idx < 0.0 {
        0
    } else {
        (idx as usize).min(last)
    };
    Some(sample[idx])
}

/// Finite AUCs of the baseline on seeds `4242 + i` for `i` in `0..runs`.
pub fn collect_local_aucs(runner: &EpisodeRunner<'_>, runs: u32) -> Result<Vec<f64>> {
    let mut aucs = Vec::new();
    for i in 0..runs {
        let report = runner.run_baseline(CALIBRATION_SEED_BASE + u64::from(i), i)?;
        if report.result.auc.is_finite() {
            aucs.push(report.result.auc);
        }
    }
    Ok(aucs)
}

/// Finite AUCs of `runs` agent episodes (run indices start at 1).
pub async fn collect_agent_aucs(
    runner: &EpisodeRunner<'_>,
    provider: &dyn ModelProvider,
    launcher: &dyn KernelLauncher,
    runs: u32,
) -> Result<Vec<f64>> {
    let mut aucs = Vec::new();
    for i in 1..=runs {
        let report = runner.run_agent_episode(provider, launcher, i).await?;
        if report.result.auc.is_finite() {
            aucs.push(report.result.auc);
        }
    }
    Ok(aucs)
}

/// Replace (or add) `pass_threshold` in `text`.
///
/// A missing key is added before the first table header so it stays a
/// top-level key.
pub fn rewrite_threshold(text: &str, value: f64) -> std::result::Result<String, regex::Error> {
    let re = Regex::new(THRESHOLD_PATTERN)?;
    let formatted = format!("{value:.4}");
    if re.is_match(text) {
        return Ok(re
            .replace_all(text, |caps: &regex::Captures<'_>| format!("{}{formatted}", &caps[1]))
            .into_owned());
    }
    Ok(format!(
        "# Auto-calibrated by `leakbench calibrate`\npass_threshold = {formatted}\n\n{text}"
    ))
}

/// Rewrite the threshold in the config file at `path` and return the new
/// contents.
///
/// A missing file counts as empty. Unless `dry_run`, the previous contents
/// are saved next to it with a `.bak` suffix first.
pub fn write_threshold(
    path: &Path,
    value: f64,
    dry_run: bool,
) -> std::result::Result<String, CalibrationError> {
    let original = if path.exists() {
        std::fs::read_to_string(path).map_err(|source| CalibrationError::Read {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        String::new()
    };
    let updated = rewrite_threshold(&original, value)?;
    if dry_run {
        return Ok(updated);
    }

    let backup = backup_path(path);
    std::fs::write(&backup, &original).map_err(|source| CalibrationError::Write {
        path: backup.clone(),
        source,
    })?;
    std::fs::write(path, &updated).map_err(|source| CalibrationError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(
        event = "calibration.written",
        path = %path.display(),
        backup = %backup.display(),
        threshold = value,
    );
    Ok(updated)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}
