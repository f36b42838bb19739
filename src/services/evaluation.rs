/// Offline ranking-quality metrics
///
/// Consumed by evaluation scripts and tests, never on the request path.
use std::collections::{HashMap, HashSet};

/// Fraction of the top-k slice that is relevant. 0 when the slice is empty.
pub fn precision_at_k(recommended: &[i64], relevant: &HashSet<i64>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let top = &recommended[..recommended.len().min(k)];
    if top.is_empty() {
        return 0.0;
    }
    let hits = top.iter().filter(|r| relevant.contains(r)).count();
    hits as f64 / top.len() as f64
}

/// Fraction of the relevant set found in the top-k slice. 0 when the
/// relevant set is empty.
pub fn recall_at_k(recommended: &[i64], relevant: &HashSet<i64>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let top = &recommended[..recommended.len().min(k)];
    let hits = top.iter().filter(|r| relevant.contains(r)).count();
    hits as f64 / relevant.len() as f64
}

/// Average precision at k: running precision at each hit, divided by the
/// size of the relevant set.
pub fn average_precision_at_k(recommended: &[i64], relevant: &HashSet<i64>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let top = &recommended[..recommended.len().min(k)];
    let mut hits = 0usize;
    let mut score = 0.0;
    for (i, item) in top.iter().enumerate() {
        if relevant.contains(item) {
            hits += 1;
            score += hits as f64 / (i + 1) as f64;
        }
    }
    score / relevant.len() as f64
}

/// Mean of per-user average precision at k over parallel slices.
pub fn mean_average_precision_at_k(
    all_recommended: &[Vec<i64>],
    all_relevant: &[HashSet<i64>],
    k: usize,
) -> f64 {
    let aps: Vec<f64> = all_recommended
        .iter()
        .zip(all_relevant.iter())
        .map(|(recs, rel)| average_precision_at_k(recs, rel, k))
        .collect();
    if aps.is_empty() {
        return 0.0;
    }
    aps.iter().sum::<f64>() / aps.len() as f64
}

/// Gain-based NDCG at k: DCG uses `(2^gain - 1) / log2(rank + 1)`, normalized
/// by the DCG of the ideal ranking (items sorted by gain descending). 0 when
/// either DCG is 0.
pub fn ndcg_at_k(recommended: &[i64], relevant: &HashMap<i64, f64>, k: usize) -> f64 {
    let dcg = |items: &[i64]| -> f64 {
        items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let gain = relevant.get(item).copied().unwrap_or(0.0);
                if gain <= 0.0 {
                    None
                } else {
                    Some((2.0_f64.powf(gain) - 1.0) / ((i + 2) as f64).log2())
                }
            })
            .sum()
    };

    let top = &recommended[..recommended.len().min(k)];
    let actual = dcg(top);
    if actual == 0.0 {
        return 0.0;
    }

    let mut ideal_items: Vec<i64> = relevant.keys().copied().collect();
    ideal_items.sort_by(|a, b| {
        relevant[b]
            .partial_cmp(&relevant[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ideal_items.truncate(k);
    let ideal = dcg(&ideal_items);
    if ideal == 0.0 {
        return 0.0;
    }
    actual / ideal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[i64]) -> HashSet<i64> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_precision_at_k() {
        let relevant = set(&[1, 2, 3]);
        assert_eq!(precision_at_k(&[1, 4, 2, 5], &relevant, 4), 0.5);
        assert_eq!(precision_at_k(&[], &relevant, 5), 0.0);
        assert_eq!(precision_at_k(&[1, 2], &relevant, 0), 0.0);
    }

    #[test]
    fn test_recall_at_k() {
        let relevant = set(&[1, 2, 3, 4]);
        assert_eq!(recall_at_k(&[1, 2, 9], &relevant, 3), 0.5);
        assert_eq!(recall_at_k(&[1, 2, 9], &HashSet::new(), 3), 0.0);
    }

    #[test]
    fn test_average_precision() {
        let relevant = set(&[1, 3]);
        // Hits at ranks 1 and 3: (1/1 + 2/3) / 2
        let ap = average_precision_at_k(&[1, 2, 3], &relevant, 3);
        assert!((ap - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
        assert_eq!(average_precision_at_k(&[1, 2], &HashSet::new(), 2), 0.0);
    }

    #[test]
    fn test_mean_average_precision() {
        let recs = vec![vec![1, 2], vec![5, 6]];
        let rels = vec![set(&[1]), set(&[9])];
        let map = mean_average_precision_at_k(&recs, &rels, 2);
        assert!((map - 0.5).abs() < 1e-12);
        assert_eq!(mean_average_precision_at_k(&[], &[], 2), 0.0);
    }

    #[test]
    fn test_ndcg_ideal_is_one() {
        let relevant: HashMap<i64, f64> = [(1, 3.0), (2, 2.0), (3, 1.0)].into_iter().collect();
        let ndcg = ndcg_at_k(&[1, 2, 3], &relevant, 3);
        assert!((ndcg - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ndcg_worse_ranking_below_one() {
        let relevant: HashMap<i64, f64> = [(1, 3.0), (2, 1.0)].into_iter().collect();
        let ndcg = ndcg_at_k(&[2, 1], &relevant, 2);
        assert!(ndcg > 0.0 && ndcg < 1.0);
    }

    #[test]
    fn test_ndcg_zero_cases() {
        let relevant: HashMap<i64, f64> = [(1, 2.0)].into_iter().collect();
        assert_eq!(ndcg_at_k(&[5, 6], &relevant, 2), 0.0);
        assert_eq!(ndcg_at_k(&[1], &HashMap::new(), 1), 0.0);
    }
}
