//! Normalization of submission shapes into a probability vector.
//!
//! Rules, first match wins:
//!
//! 1. a mapping is searched for [`PROBABILITY_KEYS`], then its `answer`
//!    sub-mapping with the same keys;
//! 2. otherwise the submission itself is the payload;
//! 3. a sequence of tuples yields the last element of each tuple;
//! 4. a sequence of row mappings yields `prob_1` (else `"1"`) of each row;
//! 5. a two-column matrix yields its second column, a one-column matrix its
//!    only column.

use serde_json::{Map, Value};

use crate::registry::PROBABILITY_KEYS;

/// Key marking a tuple that crossed the JSON boundary.
pub const TUPLE_TAG: &str = "__tuple__";

/// Row-mapping keys holding the positive-class probability, in lookup order.
pub const ROW_PROBABILITY_KEYS: [&str; 2] = ["prob_1", "1"];

/// Why a submission could not be turned into a vector.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CoercionError {
    #[error("tuple entry {0} is empty or not a tuple")]
    BadTuple(usize),

    #[error("row {index} has no '{key}' field")]
    MissingRowKey { index: usize, key: &'static str },

    #[error("matrix has {0} columns, expected 1 or 2")]
    UnsupportedWidth(usize),

    #[error("row {0} has a different width than row 0")]
    RaggedRows(usize),

    #[error("entry {0} is not numeric")]
    NotNumeric(usize),

    #[error("payload is not a sequence")]
    NotASequence,

    #[error("length {actual} != expected {expected}")]
    LengthMismatch { actual: usize, expected: usize },
}

/// The accepted payload shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    /// `[(.., p), ...]`
    Tuples(&'a [Value]),
    /// `[{"prob_1": p}, ...]`
    RowMappings {
        rows: &'a [Value],
        key: &'static str,
    },
    /// A flat vector or a matrix.
    Array(&'a [Value]),
    /// Anything that is not a sequence.
    Scalar(&'a Value),
}

impl<'a> Payload<'a> {
    /// Classify `value` by its structure.
    pub fn classify(value: &'a Value) -> Self {
        let Some(items) = as_sequence(value) else {
            return Payload::Scalar(value);
        };
        match items.first() {
            Some(first) if as_tuple(first).is_some() => Payload::Tuples(items),
            Some(Value::Object(row)) => ROW_PROBABILITY_KEYS
                .iter()
                .find(|k| row.contains_key(**k))
                .map(|key| Payload::RowMappings { rows: items, key: *key })
                .unwrap_or(Payload::Array(items)),
            _ => Payload::Array(items),
        }
    }
}

/// Find the probability payload inside `submission` (rules 1 and 2).
pub fn locate_payload(submission: &Value) -> &Value {
    if let Value::Object(fields) = submission {
        if let Some(found) = find_probabilities(fields) {
            return found;
        }
        if let Some(Value::Object(inner)) = fields.get("answer") {
            if let Some(found) = find_probabilities(inner) {
                return found;
            }
        }
    }
    submission
}

/// Coerce `submission` into exactly `n_expected` values.
///
/// Values are returned as submitted: non-finite entries survive so the
/// caller can report them separately.
pub fn coerce_probabilities(
    submission: &Value,
    n_expected: usize,
) -> Result<Vec<f64>, CoercionError> {
    let vec = match Payload::classify(locate_payload(submission)) {
        Payload::Tuples(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let last = as_tuple(item)
                    .and_then(|t| t.last())
                    .ok_or(CoercionError::BadTuple(i))?;
                to_f64(last).ok_or(CoercionError::NotNumeric(i))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Payload::RowMappings { rows, key } => rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let value = row
                    .get(key)
                    .ok_or(CoercionError::MissingRowKey { index: i, key })?;
                to_f64(value).ok_or(CoercionError::NotNumeric(i))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Payload::Array(items) => flatten(items)?,
        Payload::Scalar(_) => return Err(CoercionError::NotASequence),
    };

    if vec.len() != n_expected {
        return Err(CoercionError::LengthMismatch {
            actual: vec.len(),
            expected: n_expected,
        });
    }
    Ok(vec)
}

fn find_probabilities(fields: &Map<String, Value>) -> Option<&Value> {
    PROBABILITY_KEYS.iter().find_map(|k| fields.get(*k))
}

/// Arrays, and tuples used as arrays.
fn as_sequence(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Array(items) => Some(items),
        other => as_tuple(other),
    }
}

fn as_tuple(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Object(map) if map.len() == 1 => match map.get(TUPLE_TAG) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Rule 5, plus the flat case.
fn flatten(items: &[Value]) -> Result<Vec<f64>, CoercionError> {
    let Some(width) = items.first().and_then(as_sequence).map(<[Value]>::len) else {
        return items
            .iter()
            .enumerate()
            .map(|(i, v)| to_f64(v).ok_or(CoercionError::NotNumeric(i)))
            .collect();
    };
    let column = match width {
        1 => 0,
        2 => 1,
        other => return Err(CoercionError::UnsupportedWidth(other)),
    };
    items
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let row = as_sequence(row)
                .filter(|r| r.len() == width)
                .ok_or(CoercionError::RaggedRows(i))?;
            to_f64(&row[column]).ok_or(CoercionError::NotNumeric(i))
        })
        .collect()
}

/// Numeric view of a JSON scalar. `null` is NaN and numeric strings (including
/// `"nan"` and `"inf"`) are parsed.
fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(f64::NAN),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tuple(values: Value) -> Value {
        let mut map = Map::new();
        map.insert(TUPLE_TAG.to_string(), values);
        Value::Object(map)
    }

    #[test]
    fn test_primary_key_round_trips() {
        let sub = json!({"y_pred_proba": [0.1, 0.9, 0.2, 0.8], "pipeline": "lr"});
        assert_eq!(
            coerce_probabilities(&sub, 4).unwrap(),
            vec![0.1, 0.9, 0.2, 0.8]
        );
    }

    #[test]
    fn test_key_priority_order() {
        let sub = json!({"y_pred": [0.0], "proba": [0.5], "y_pred_proba": [0.7]});
        assert_eq!(coerce_probabilities(&sub, 1).unwrap(), vec![0.7]);
        let sub = json!({"y_pred": [0.0], "proba": [0.5]});
        assert_eq!(coerce_probabilities(&sub, 1).unwrap(), vec![0.5]);
    }

    #[test]
    fn test_nested_answer_mapping() {
        let sub = json!({"answer": {"probas": [0.3, 0.6]}});
        assert_eq!(coerce_probabilities(&sub, 2).unwrap(), vec![0.3, 0.6]);
    }

    #[test]
    fn test_bare_list_is_payload() {
        assert_eq!(
            coerce_probabilities(&json!([0.25, 0.75]), 2).unwrap(),
            vec![0.25, 0.75]
        );
    }

    #[test]
    fn test_tuple_entries_take_last_element() {
        let sub = json!({"y_pred_proba": [tuple(json!([0, 0.2])), tuple(json!([1, 0.9]))]});
        assert_eq!(coerce_probabilities(&sub, 2).unwrap(), vec![0.2, 0.9]);
    }

    #[test]
    fn test_row_mappings_prefer_prob_1() {
        let sub = json!({"y_pred_proba": [{"prob_0": 0.6, "prob_1": 0.4}, {"prob_1": 0.1}]});
        assert_eq!(coerce_probabilities(&sub, 2).unwrap(), vec![0.4, 0.1]);

        let sub = json!({"y_pred_proba": [{"0": 0.6, "1": 0.4}]});
        assert_eq!(coerce_probabilities(&sub, 1).unwrap(), vec![0.4]);
    }

    #[test]
    fn test_row_mapping_missing_key_fails() {
        let sub = json!({"y_pred_proba": [{"prob_1": 0.4}, {"p": 0.1}]});
        assert_eq!(
            coerce_probabilities(&sub, 2).unwrap_err(),
            CoercionError::MissingRowKey { index: 1, key: "prob_1" }
        );
    }

    #[test]
    fn test_two_column_matrix_takes_second_column() {
        let sub = json!({"y_pred_proba": [[0.9, 0.1], [0.2, 0.8], [0.5, 0.5]]});
        assert_eq!(coerce_probabilities(&sub, 3).unwrap(), vec![0.1, 0.8, 0.5]);
    }

    #[test]
    fn test_one_column_matrix_is_flattened() {
        let sub = json!({"y_pred_proba": [[0.1], [0.8]]});
        assert_eq!(coerce_probabilities(&sub, 2).unwrap(), vec![0.1, 0.8]);
    }

    #[test]
    fn test_three_column_matrix_fails() {
        let sub = json!({"y_pred_proba": [[0.1, 0.2, 0.7]]});
        assert_eq!(
            coerce_probabilities(&sub, 1).unwrap_err(),
            CoercionError::UnsupportedWidth(3)
        );
    }

    #[test]
    fn test_ragged_matrix_fails() {
        let sub = json!({"y_pred_proba": [[0.9, 0.1], [0.8]]});
        assert_eq!(
            coerce_probabilities(&sub, 2).unwrap_err(),
            CoercionError::RaggedRows(1)
        );
    }

    #[test]
    fn test_length_mismatch() {
        let sub = json!({"y_pred_proba": [0.1, 0.2, 0.3]});
        assert_eq!(
            coerce_probabilities(&sub, 4).unwrap_err(),
            CoercionError::LengthMismatch { actual: 3, expected: 4 }
        );
    }

    #[test]
    fn test_scalar_and_text_payloads_fail() {
        assert_eq!(
            coerce_probabilities(&json!({"y_pred_proba": 0.5}), 1).unwrap_err(),
            CoercionError::NotASequence
        );
        assert_eq!(
            coerce_probabilities(&json!({"y_pred_proba": ["high"]}), 1).unwrap_err(),
            CoercionError::NotNumeric(0)
        );
    }

    #[test]
    fn test_non_finite_markers_survive_coercion() {
        let sub = json!({"y_pred_proba": ["nan", 0.5, null]});
        let vec = coerce_probabilities(&sub, 3).unwrap();
        assert!(vec[0].is_nan());
        assert_eq!(vec[1], 0.5);
        assert!(vec[2].is_nan());
    }

    #[test]
    fn test_mapping_without_keys_is_not_coercible() {
        assert!(coerce_probabilities(&json!({"pipeline": "lr"}), 1).is_err());
    }

    #[test]
    fn test_classify_shapes() {
        let rows = json!([{"prob_1": 0.2}]);
        assert!(matches!(
            Payload::classify(&rows),
            Payload::RowMappings { key: "prob_1", .. }
        ));
        assert!(matches!(Payload::classify(&json!(3)), Payload::Scalar(_)));
        assert!(matches!(Payload::classify(&json!([1, 2])), Payload::Array(_)));
    }
}
