//! Area under the ROC curve.

use std::cmp::Ordering;

/// Number of distinct label values.
pub fn distinct_classes(labels: &[u8]) -> usize {
    let mut seen = [false; 256];
    labels.iter().for_each(|&l| seen[l as usize] = true);
    seen.iter().filter(|s| **s).count()
}

/// ROC AUC of `scores` against binary `labels` (positive = non-zero).
///
/// Computed as the Mann-Whitney U statistic with average ranks for tied
/// scores. Returns `None` when either class is absent or the lengths differ.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    if labels.len() != scores.len() {
        return None;
    }
    let n_pos = labels.iter().filter(|&&l| l != 0).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut rank_sum_pos = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; the tie group spans start+1..=end
        let avg_rank = (start + 1 + end) as f64 / 2.0;
        rank_sum_pos += order[start..end]
            .iter()
            .filter(|&&i| labels[i] != 0)
            .count() as f64
            * avg_rank;
        start = end;
    }

    let n_pos = n_pos as f64;
    let u = rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg as f64))
}
