//! Submission grading.
//!
//! Checks run in a fixed order and stop at the first failure:
//! `submission_format_ok`, `submission_numeric_ok`, `auc_defined`,
//! `metric_ok`. Grading never fails outward; a bad submission is a failed
//! [`GradingResult`] with `auc = NaN`.

pub mod coerce;
pub mod metric;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::domain::ProblemInstance;

pub use coerce::{coerce_probabilities, locate_payload, CoercionError, Payload, TUPLE_TAG};
pub use metric::{distinct_classes, roc_auc};

/// A named grading check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    SubmissionFormatOk,
    SubmissionNumericOk,
    AucDefined,
    MetricOk,
}

impl Check {
    pub fn as_str(self) -> &'static str {
        match self {
            Check::SubmissionFormatOk => "submission_format_ok",
            Check::SubmissionNumericOk => "submission_numeric_ok",
            Check::AucDefined => "auc_defined",
            Check::MetricOk => "metric_ok",
        }
    }
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of grading one submission.
#[derive(Debug, Clone, Serialize)]
pub struct GradingResult {
    pub passed: bool,
    /// ROC AUC of the clipped predictions, NaN when not computed.
    pub auc: f64,
    /// Checks evaluated, in evaluation order.
    pub checks: BTreeMap<Check, bool>,
    /// Human-readable reason for the first failed check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl GradingResult {
    /// Failed result for a submission that could not be read at all.
    pub fn format_failure(reason: impl Into<String>) -> Self {
        let mut checks = BTreeMap::new();
        checks.insert(Check::SubmissionFormatOk, false);
        Self {
            passed: false,
            auc: f64::NAN,
            checks,
            failure: Some(reason.into()),
        }
    }

    /// Names of the checks that came out false.
    pub fn failed_checks(&self) -> Vec<Check> {
        self.checks
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(check, _)| *check)
            .collect()
    }

    pub fn check(&self, check: Check) -> Option<bool> {
        self.checks.get(&check).copied()
    }
}

/// Scores submissions against a pass threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grader {
    threshold: f64,
}

impl Grader {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn grade_problem(&self, submission: &Value, problem: &ProblemInstance) -> GradingResult {
        self.grade(submission, &problem.test_labels)
    }

    /// Grade `submission` against ground-truth `labels`.
    pub fn grade(&self, submission: &Value, labels: &[u8]) -> GradingResult {
        let mut checks = BTreeMap::new();
        let fail = |checks: BTreeMap<Check, bool>, reason: String| GradingResult {
            passed: false,
            auc: f64::NAN,
            checks,
            failure: Some(reason),
        };

        let predictions = match coerce_probabilities(submission, labels.len()) {
            Ok(p) => {
                checks.insert(Check::SubmissionFormatOk, true);
                p
            }
            Err(err) => {
                checks.insert(Check::SubmissionFormatOk, false);
                return fail(checks, err.to_string());
            }
        };

        let numeric = predictions.iter().all(|p| p.is_finite());
        checks.insert(Check::SubmissionNumericOk, numeric);
        if !numeric {
            return fail(checks, "predictions contain non-finite values".to_string());
        }

        let clipped: Vec<f64> = predictions.iter().map(|p| p.clamp(0.0, 1.0)).collect();

        let defined = distinct_classes(labels) >= 2;
        checks.insert(Check::AucDefined, defined);
        let auc = match roc_auc(labels, &clipped) {
            Some(auc) if defined => auc,
            _ => return fail(checks, "ground truth has a single class".to_string()),
        };

        let passed = auc >= self.threshold;
        checks.insert(Check::MetricOk, passed);
        GradingResult {
            passed,
            auc,
            checks,
            failure: (!passed).then(|| format!("auc {auc:.4} below threshold {:.4}", self.threshold)),
        }
    }
}
