//! Leakage-free reference model used by local mode and calibration.
//!
//! Leak columns and the target are dropped; numeric features are median
//! imputed and standardised with train statistics; categorical features are
//! one-hot encoded over the categories seen in train. An L2-regularised
//! logistic regression is fit by full-batch gradient descent.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::domain::{ColumnData, ProblemInstance, Table};

const LEARNING_RATE: f64 = 0.5;
const ITERATIONS: usize = 500;
/// Inverse regularisation strength.
const C: f64 = 1.0;

/// How one train column turns into model features.
#[derive(Debug, Clone, PartialEq)]
enum Encoder {
    Numeric { name: String, median: f64, mean: f64, std: f64 },
    OneHot { name: String, levels: Vec<u32> },
}

impl Encoder {
    fn fit(name: &str, data: &ColumnData) -> Self {
        match data {
            ColumnData::Category(codes) => Encoder::OneHot {
                name: name.to_string(),
                levels: codes.iter().copied().collect::<BTreeSet<_>>().into_iter().collect(),
            },
            other => {
                let raw: Vec<f64> = (0..other.len()).filter_map(|i| other.value_f64(i)).collect();
                let median = median(&raw);
                let filled: Vec<f64> = raw
                    .iter()
                    .map(|v| if v.is_nan() { median } else { *v })
                    .collect();
                let n = filled.len().max(1) as f64;
                let mean = filled.iter().sum::<f64>() / n;
                let var = filled.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = if var > 0.0 { var.sqrt() } else { 1.0 };
                Encoder::Numeric {
                    name: name.to_string(),
                    median,
                    mean,
                    std,
                }
            }
        }
    }

    fn name(&self) -> &str {
        match self {
            Encoder::Numeric { name, .. } | Encoder::OneHot { name, .. } => name,
        }
    }

    fn width(&self) -> usize {
        match self {
            Encoder::Numeric { .. } => 1,
            Encoder::OneHot { levels, .. } => levels.len(),
        }
    }

    /// Append this column's features for `row` to `out`. A missing column
    /// encodes as the imputed value (numeric) or all zeros (one-hot).
    fn encode(&self, data: Option<&ColumnData>, row: usize, out: &mut Vec<f64>) {
        match self {
            Encoder::Numeric {
                median, mean, std, ..
            } => {
                let v = data
                    .and_then(|d| d.value_f64(row))
                    .filter(|v| !v.is_nan())
                    .unwrap_or(*median);
                out.push((v - mean) / std);
            }
            Encoder::OneHot { levels, .. } => {
                let code = match data {
                    Some(ColumnData::Category(codes)) => codes.get(row).copied(),
                    _ => None,
                };
                out.extend(levels.iter().map(|l| if Some(*l) == code { 1.0 } else { 0.0 }));
            }
        }
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// A fitted preprocessing + logistic regression pipeline.
#[derive(Debug, Clone)]
pub struct BaselineModel {
    encoders: Vec<Encoder>,
    weights: Vec<f64>,
    bias: f64,
}

impl BaselineModel {
    /// Fit on every column of `train`. `labels` align with rows.
    pub fn fit(train: &Table, labels: &[u8]) -> Self {
        let encoders: Vec<Encoder> = train
            .columns()
            .iter()
            .map(|c| Encoder::fit(&c.name, &c.data))
            .collect();

        let mut model = Self {
            weights: vec![0.0; encoders.iter().map(Encoder::width).sum()],
            encoders,
            bias: 0.0,
        };
        let x = model.design_matrix(train);
        model.gradient_descent(&x, labels);
        model
    }

    fn design_matrix(&self, table: &Table) -> Vec<Vec<f64>> {
        let columns: Vec<Option<&ColumnData>> = self
            .encoders
            .iter()
            .map(|e| table.column(e.name()).map(|c| &c.data))
            .collect();
        (0..table.n_rows())
            .map(|row| {
                let mut features = Vec::with_capacity(self.weights.len());
                for (encoder, data) in self.encoders.iter().zip(&columns) {
                    encoder.encode(*data, row, &mut features);
                }
                features
            })
            .collect()
    }

    fn gradient_descent(&mut self, x: &[Vec<f64>], y: &[u8]) {
        let n = x.len();
        if n == 0 {
            return;
        }
        let n_f = n as f64;
        for _ in 0..ITERATIONS {
            let mut grad_w: Vec<f64> = self.weights.iter().map(|w| w / (C * n_f)).collect();
            let mut grad_b = 0.0;
            for (row, &label) in x.iter().zip(y) {
                let residual = sigmoid(self.score(row)) - f64::from(label);
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += residual * v / n_f;
                }
                grad_b += residual / n_f;
            }
            for (w, g) in self.weights.iter_mut().zip(&grad_w) {
                *w -= LEARNING_RATE * g;
            }
            self.bias -= LEARNING_RATE * grad_b;
        }
    }

    fn score(&self, row: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(row).map(|(w, v)| w * v).sum::<f64>()
    }

    /// Positive-class probabilities for every row of `table`.
    pub fn predict_proba(&self, table: &Table) -> Vec<f64> {
        self.design_matrix(table)
            .iter()
            .map(|row| sigmoid(self.score(row)))
            .collect()
    }

    pub fn describe(&self) -> String {
        let (numeric, categorical): (Vec<&Encoder>, Vec<&Encoder>) = self
            .encoders
            .iter()
            .partition(|e| matches!(e, Encoder::Numeric { .. }));
        let names = |es: &[&Encoder]| es.iter().map(|e| e.name()).collect::<Vec<_>>().join(",");
        format!(
            "numeric[{}]: impute(median) + scale; categorical[{}]: one-hot(ignore unknown); \
             logistic regression (C={C})",
            names(&numeric),
            names(&categorical)
        )
    }
}

/// Build the baseline submission for `problem`:
/// `{"y_pred_proba": [...], "pipeline": "..."}`.
pub fn build_baseline_submission(problem: &ProblemInstance) -> Value {
    let target = problem.spec.target_column.as_str();
    let mut excluded: Vec<&str> = problem.spec.leak_columns.iter().map(String::as_str).collect();
    excluded.push(target);

    let labels: Vec<u8> = match problem.train.column(target).map(|c| &c.data) {
        Some(data) => (0..data.len())
            .map(|i| u8::from(data.value_f64(i).unwrap_or(0.0) > 0.5))
            .collect(),
        None => vec![0; problem.train.n_rows()],
    };

    let model = BaselineModel::fit(&problem.train.without(&excluded), &labels);
    json!({
        "y_pred_proba": model.predict_proba(&problem.test),
        "pipeline": model.describe(),
    })
}
