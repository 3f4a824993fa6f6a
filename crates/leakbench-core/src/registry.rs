//! Single-slot submission registry.
//!
//! One registry exists per episode. It is shared by the `submit_answer` tool
//! handler and the sandbox's in-code `submit_answer` capability, so both
//! submission styles observe the same accept-once slot.
//!
//! The first accepted answer wins: later calls replay it instead of
//! overwriting, even when the agent is trying to correct itself.

use std::sync::{Mutex, PoisonError};

use serde_json::{json, Value};

use crate::obs;

/// Keys under which a submission may carry its probabilities, in lookup order.
pub const PROBABILITY_KEYS: [&str; 5] = ["y_pred_proba", "probas", "proba", "pred_proba", "y_pred"];

/// Result of a submission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The answer held by the registry (possibly an earlier one).
    Accepted(Value),
    /// Nothing stored; the reason is shown to the agent.
    Rejected(String),
}

impl SubmitOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }

    pub fn answer(&self) -> Option<&Value> {
        match self {
            SubmitOutcome::Accepted(answer) => Some(answer),
            SubmitOutcome::Rejected(_) => None,
        }
    }

    /// Compact payload returned to the model as the tool result.
    pub fn to_tool_content(&self) -> Value {
        match self {
            SubmitOutcome::Accepted(_) => json!({"submitted": true}),
            SubmitOutcome::Rejected(reason) => json!({"submitted": false, "error": reason}),
        }
    }
}

/// Accept-once submission slot.
#[derive(Debug, Default)]
pub struct SubmissionRegistry {
    slot: Mutex<Option<Value>>,
}

impl SubmissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store `answer` unless an answer was already accepted.
    pub fn submit(&self, answer: Value) -> SubmitOutcome {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            obs::emit_submission_replayed();
            return SubmitOutcome::Accepted(existing.clone());
        }

        let Some(fields) = answer.as_object() else {
            return SubmitOutcome::Rejected("ERROR: answer must be a mapping".to_string());
        };
        if !PROBABILITY_KEYS.iter().any(|k| fields.contains_key(*k)) {
            return SubmitOutcome::Rejected(format!(
                "ERROR: include probabilities under {}",
                PROBABILITY_KEYS.join("/")
            ));
        }

        obs::emit_submission_accepted(fields.keys().map(String::as_str));
        *slot = Some(answer.clone());
        SubmitOutcome::Accepted(answer)
    }

    /// Take the stored answer, leaving the slot empty.
    pub fn pop(&self) -> Option<Value> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
