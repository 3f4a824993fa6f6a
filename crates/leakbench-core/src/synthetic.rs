//! Synthetic binary-classification problems with planted leak columns.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::config::LeakToggles;
use crate::domain::{ColumnData, LeakSpec, ProblemInstance, ProblemProvider, Result, Table};

pub const LEAK_FUTURE_SIGNAL: &str = "leak_future_signal";
pub const LEAK_GLOBAL_TARGET_MEAN: &str = "leak_global_target_mean";
pub const LEAK_CAT0_RATE_FULL: &str = "leak_cat0_rate_full";

const NUMERIC_WEIGHTS: [f64; 5] = [1.2, -0.8, 0.6, 0.4, -0.2];
const CAT0_LEVELS: u32 = 4;
const CAT1_LEVELS: u32 = 3;
const NOISE_STD: f64 = 0.8;

/// One split before leak columns are added.
struct Split {
    numeric: Vec<[f64; 5]>,
    cat0: Vec<u32>,
    cat1: Vec<u32>,
    target: Vec<u8>,
}

impl Split {
    fn into_table(self) -> Result<Table> {
        let mut table = Table::new();
        for (i, _) in NUMERIC_WEIGHTS.iter().enumerate() {
            let values = self.numeric.iter().map(|row| row[i]).collect();
            table.push_column(format!("num_{i}"), ColumnData::Float(values))?;
        }
        table.push_column("cat0", ColumnData::Category(self.cat0))?;
        table.push_column("cat1", ColumnData::Category(self.cat1))?;
        table.push_column(
            "target",
            ColumnData::Int(self.target.iter().map(|&y| i64::from(y)).collect()),
        )?;
        Ok(table)
    }
}

/// Generates problems from a logistic model over five numeric and two
/// categorical features, then adds the enabled leak columns.
#[derive(Debug, Clone, Default)]
pub struct SyntheticLeakProvider {
    leaks: LeakToggles,
}

impl SyntheticLeakProvider {
    pub fn new(leaks: LeakToggles) -> Self {
        Self { leaks }
    }

    fn sample_split(rng: &mut StdRng, n: usize) -> Split {
        let numeric: Vec<[f64; 5]> = (0..n)
            .map(|_| std::array::from_fn(|_| rng.sample(StandardNormal)))
            .collect();
        let cat0: Vec<u32> = (0..n).map(|_| rng.gen_range(0..CAT0_LEVELS)).collect();
        let cat1: Vec<u32> = (0..n).map(|_| rng.gen_range(0..CAT1_LEVELS)).collect();

        let target = (0..n)
            .map(|i| {
                let linear: f64 = numeric[i]
                    .iter()
                    .zip(NUMERIC_WEIGHTS)
                    .map(|(x, w)| x * w)
                    .sum();
                let cat0_effect = if cat0[i] == 1 { 0.5 } else { 0.0 };
                let cat1_effect = if cat1[i] == 2 { -0.3 } else { 0.0 };
                let noise: f64 = rng.sample(StandardNormal);
                let logit = linear + cat0_effect + cat1_effect + NOISE_STD * noise;
                u8::from(sigmoid(logit) > 0.5)
            })
            .collect();

        Split {
            numeric,
            cat0,
            cat1,
            target,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Target rate per `cat0` level over both splits.
fn cat0_rates(train: &Split, test: &Split) -> Vec<f64> {
    let mut sums = vec![0.0; CAT0_LEVELS as usize];
    let mut counts = vec![0usize; CAT0_LEVELS as usize];
    for split in [train, test] {
        for (&c, &y) in split.cat0.iter().zip(&split.target) {
            sums[c as usize] += f64::from(y);
            counts[c as usize] += 1;
        }
    }
    sums.iter()
        .zip(&counts)
        .map(|(s, &n)| if n == 0 { f64::NAN } else { s / n as f64 })
        .collect()
}

impl ProblemProvider for SyntheticLeakProvider {
    fn make_problem(&self, seed: u64, n_train: usize, n_test: usize) -> Result<ProblemInstance> {
        let mut rng = StdRng::seed_from_u64(seed);
        let train_split = Self::sample_split(&mut rng, n_train);
        let test_split = Self::sample_split(&mut rng, n_test);

        let total = (n_train + n_test) as f64;
        let positives: f64 = train_split
            .target
            .iter()
            .chain(&test_split.target)
            .map(|&y| f64::from(y))
            .sum();
        let global_mean = if total > 0.0 { positives / total } else { f64::NAN };
        let rates = cat0_rates(&train_split, &test_split);

        let test_labels = test_split.target.clone();
        let future = |s: &Split| s.target.iter().map(|&y| i64::from(y)).collect::<Vec<_>>();
        let cat0_rate = |s: &Split| s.cat0.iter().map(|&c| rates[c as usize]).collect::<Vec<_>>();

        let mut leak_columns = Vec::new();
        let mut train_leaks: Vec<(&str, ColumnData)> = Vec::new();
        let mut test_leaks: Vec<(&str, ColumnData)> = Vec::new();
        if self.leaks.future_signal {
            leak_columns.push(LEAK_FUTURE_SIGNAL.to_string());
            train_leaks.push((LEAK_FUTURE_SIGNAL, ColumnData::Int(future(&train_split))));
            test_leaks.push((LEAK_FUTURE_SIGNAL, ColumnData::Int(future(&test_split))));
        }
        if self.leaks.global_target_mean {
            leak_columns.push(LEAK_GLOBAL_TARGET_MEAN.to_string());
            train_leaks.push((LEAK_GLOBAL_TARGET_MEAN, ColumnData::Float(vec![global_mean; n_train])));
            test_leaks.push((LEAK_GLOBAL_TARGET_MEAN, ColumnData::Float(vec![global_mean; n_test])));
        }
        if self.leaks.cat0_rate_full {
            leak_columns.push(LEAK_CAT0_RATE_FULL.to_string());
            train_leaks.push((LEAK_CAT0_RATE_FULL, ColumnData::Float(cat0_rate(&train_split))));
            test_leaks.push((LEAK_CAT0_RATE_FULL, ColumnData::Float(cat0_rate(&test_split))));
        }

        let mut train = train_split.into_table()?;
        for (name, data) in train_leaks {
            train.push_column(name, data)?;
        }
        let mut test = test_split.into_table()?;
        for (name, data) in test_leaks {
            test.push_column(name, data)?;
        }

        Ok(ProblemInstance {
            train,
            test,
            test_labels,
            spec: LeakSpec::new(leak_columns),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(leaks: LeakToggles, seed: u64) -> ProblemInstance {
        SyntheticLeakProvider::new(leaks)
            .make_problem(seed, 120, 40)
            .unwrap()
    }

    #[test]
    fn test_shapes_and_columns() {
        let p = make(LeakToggles::default(), 42);
        assert_eq!(p.train.n_rows(), 120);
        assert_eq!(p.test.n_rows(), 40);
        assert_eq!(p.test_labels.len(), 40);
        assert_eq!(
            p.train.column_names(),
            vec![
                "num_0", "num_1", "num_2", "num_3", "num_4", "cat0", "cat1", "target",
                LEAK_FUTURE_SIGNAL, LEAK_GLOBAL_TARGET_MEAN, LEAK_CAT0_RATE_FULL,
            ]
        );
        assert_eq!(p.spec.target_column, "target");
        assert_eq!(p.present_leaks().len(), 3);
    }

    #[test]
    fn test_same_seed_same_problem() {
        assert_eq!(make(LeakToggles::default(), 7), make(LeakToggles::default(), 7));
        assert_ne!(
            make(LeakToggles::default(), 7).test_labels,
            make(LeakToggles::default(), 8).test_labels
        );
    }

    #[test]
    fn test_future_signal_copies_target() {
        let p = make(LeakToggles::default(), 3);
        let leak = &p.test.column(LEAK_FUTURE_SIGNAL).unwrap().data;
        let labels: Vec<i64> = p.test_labels.iter().map(|&y| i64::from(y)).collect();
        assert_eq!(leak, &ColumnData::Int(labels));
    }

    #[test]
    fn test_global_mean_is_constant_over_both_splits() {
        let p = make(LeakToggles::default(), 5);
        let ColumnData::Float(train) = &p.train.column(LEAK_GLOBAL_TARGET_MEAN).unwrap().data else {
            panic!("expected float column");
        };
        let ColumnData::Int(train_y) = &p.train.column("target").unwrap().data else {
            panic!("expected int target");
        };
        let positives: i64 = train_y.iter().sum::<i64>()
            + p.test_labels.iter().map(|&y| i64::from(y)).sum::<i64>();
        let expected = positives as f64 / 160.0;
        assert!(train.iter().all(|v| (v - expected).abs() < 1e-12));
    }

    #[test]
    fn test_disabled_leaks_are_absent() {
        let p = make(
            LeakToggles {
                future_signal: false,
                global_target_mean: false,
                cat0_rate_full: true,
            },
            11,
        );
        assert_eq!(p.spec.leak_columns, vec![LEAK_CAT0_RATE_FULL]);
        assert!(!p.train.contains(LEAK_FUTURE_SIGNAL));
        assert_eq!(p.present_leaks(), vec![LEAK_CAT0_RATE_FULL]);
    }

    #[test]
    fn test_both_classes_present_at_default_size() {
        let p = SyntheticLeakProvider::default()
            .make_problem(1000, 800, 200)
            .unwrap();
        assert!(p.test_labels.contains(&0));
        assert!(p.test_labels.contains(&1));
    }
}
