/// Pairwise aggregation and score preprocessing
///
/// Turns grouped (actor, target, day, event_type) counts into one decayed
/// score per (actor, target) pair, plus the outlier-bound and normalization
/// helpers applied before matrix construction.
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::PairScore;
use crate::services::scoring::ScoringParams;
use crate::store::DailyPairCount;
use crate::utils::{days_ago, half_life_decay};

/// Aggregate daily per-type counts into decayed pair scores.
///
/// Per (actor, target, day): sum `event_score` across the event types seen
/// that day, skip non-positive day scores, then decay by the elapsed time
/// since the latest occurrence within that day-group. Day contributions are
/// summed per (actor, target); pairs whose final score is <= 0 are dropped.
pub fn aggregate_pair_scores(
    rows: &[DailyPairCount],
    params: &ScoringParams,
    now: DateTime<Utc>,
    half_life_days: f64,
) -> Vec<PairScore> {
    // (actor, target, day) -> (summed base score, latest occurrence)
    let mut day_groups: HashMap<(i64, i64, chrono::NaiveDate), (f64, DateTime<Utc>)> =
        HashMap::new();

    for row in rows {
        let base = params.event_score(row.event_type, row.count);
        let entry = day_groups
            .entry((row.actor_user_id, row.target_user_id, row.day))
            .or_insert((0.0, row.last_occurred_at));
        entry.0 += base;
        if row.last_occurred_at > entry.1 {
            entry.1 = row.last_occurred_at;
        }
    }

    let mut pair_scores: HashMap<(i64, i64), f64> = HashMap::new();
    for ((actor, target, _day), (base_day, last_occurred_at)) in day_groups {
        if base_day <= 0.0 {
            continue;
        }
        let decay = half_life_decay(days_ago(last_occurred_at, now), half_life_days);
        *pair_scores.entry((actor, target)).or_insert(0.0) += base_day * decay;
    }

    let mut out: Vec<PairScore> = pair_scores
        .into_iter()
        .filter(|(_, score)| *score > 0.0)
        .map(|((actor, target), score)| PairScore {
            actor_user_id: actor,
            target_user_id: target,
            score,
        })
        .collect();
    // Deterministic output order for reproducible downstream construction.
    out.sort_by_key(|p| (p.actor_user_id, p.target_user_id));
    out
}

/// IQR-based outlier bounds: `(Q1 - factor*IQR, Q3 + factor*IQR)` with
/// linear-interpolated quartiles. Fewer than 4 values or a non-positive IQR
/// fall back to `(min, max)`; an empty input yields `(0, 0)`.
pub fn iqr_bounds(values: &[f64], factor: f64) -> (f64, f64) {
    let mut data: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    data.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = data.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    if n < 4 {
        return (data[0], data[n - 1]);
    }

    let percentile = |sorted: &[f64], p: f64| -> f64 {
        let k = (sorted.len() - 1) as f64 * p;
        let f = k.floor() as usize;
        let c = (f + 1).min(sorted.len() - 1);
        if f == c {
            return sorted[f];
        }
        let d = k - f as f64;
        sorted[f] * (1.0 - d) + sorted[c] * d
    };

    let q1 = percentile(&data, 0.25);
    let q3 = percentile(&data, 0.75);
    let iqr = q3 - q1;
    if iqr <= 0.0 {
        return (data[0], data[n - 1]);
    }
    (q1 - factor * iqr, q3 + factor * iqr)
}

/// L2 row-normalization: per actor, divide each target score by the
/// Euclidean norm of that actor's score vector. A non-positive norm leaves
/// the actor's scores unchanged.
pub fn l2_normalize_rows(pairs: &[PairScore]) -> Vec<PairScore> {
    let mut norms: HashMap<i64, f64> = HashMap::new();
    for p in pairs {
        *norms.entry(p.actor_user_id).or_insert(0.0) += p.score * p.score;
    }
    for norm in norms.values_mut() {
        *norm = norm.sqrt();
    }

    pairs
        .iter()
        .map(|p| {
            let norm = norms.get(&p.actor_user_id).copied().unwrap_or(0.0);
            if norm <= 0.0 {
                *p
            } else {
                PairScore {
                    score: p.score / norm,
                    ..*p
                }
            }
        })
        .collect()
}

/// Sparsity of a rows x cols matrix holding `nnz` non-zero cells.
pub fn compute_sparsity(rows: usize, cols: usize, nnz: usize) -> f64 {
    if rows == 0 || cols == 0 {
        return 1.0;
    }
    1.0 - nnz as f64 / (rows as f64 * cols as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use chrono::TimeZone;

    fn row(
        actor: i64,
        target: i64,
        day: (i32, u32, u32),
        event_type: EventType,
        count: i64,
        last: DateTime<Utc>,
    ) -> DailyPairCount {
        DailyPairCount {
            actor_user_id: actor,
            target_user_id: target,
            day: chrono::NaiveDate::from_ymd_opt(day.0, day.1, day.2).unwrap(),
            event_type,
            count,
            last_occurred_at: last,
        }
    }

    #[test]
    fn test_aggregate_empty_window() {
        let params = ScoringParams::default();
        let now = Utc::now();
        assert!(aggregate_pair_scores(&[], &params, now, 30.0).is_empty());
    }

    #[test]
    fn test_aggregate_like_and_view_scenario() {
        // Events: (A->B, like, t0), (A->B, like, t0+1d), (A->C, view, t0).
        // The two likes land on different calendar days, so each day group
        // contributes ln(1 + 1) decayed from its own last occurrence.
        let params = ScoringParams::default();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::days(1);
        let now = t0 + chrono::Duration::days(10);

        let rows = vec![
            row(1, 2, (2025, 5, 1), EventType::Like, 1, t0),
            row(1, 2, (2025, 5, 2), EventType::Like, 1, t1),
            row(1, 3, (2025, 5, 1), EventType::View, 1, t0),
        ];
        let pairs = aggregate_pair_scores(&rows, &params, now, 30.0);
        assert_eq!(pairs.len(), 2);

        let ab = pairs.iter().find(|p| p.target_user_id == 2).unwrap();
        let ln2 = 2.0_f64.ln();
        let expected_ab = ln2 * half_life_decay(10.0, 30.0) + ln2 * half_life_decay(9.0, 30.0);
        assert!((ab.score - expected_ab).abs() < 1e-9);

        let ac = pairs.iter().find(|p| p.target_user_id == 3).unwrap();
        let expected_ac = 0.1 * ln2 * half_life_decay(10.0, 30.0);
        assert!((ac.score - expected_ac).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_same_day_counts_combine() {
        // Two likes in one calendar day form a single count-2 group:
        // 1.0 * ln(1 + min(2, 300)) * decay.
        let params = ScoringParams::default();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let now = t0 + chrono::Duration::days(3);

        let rows = vec![row(1, 2, (2025, 5, 1), EventType::Like, 2, t0)];
        let pairs = aggregate_pair_scores(&rows, &params, now, 30.0);
        assert_eq!(pairs.len(), 1);
        let expected = 3.0_f64.ln() * half_life_decay(3.0, 30.0);
        assert!((pairs[0].score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_iqr_bounds_small_sample_passthrough() {
        assert_eq!(iqr_bounds(&[], 1.5), (0.0, 0.0));
        assert_eq!(iqr_bounds(&[3.0], 1.5), (3.0, 3.0));
        assert_eq!(iqr_bounds(&[3.0, 1.0, 2.0], 1.5), (1.0, 3.0));
        // Zero IQR falls back to (min, max)
        assert_eq!(iqr_bounds(&[5.0, 5.0, 5.0, 5.0, 5.0], 1.5), (5.0, 5.0));
    }

    #[test]
    fn test_iqr_bounds_interpolated() {
        let values = [1.0, 2.0, 3.0, 4.0];
        // Q1 = 1.75, Q3 = 3.25, IQR = 1.5
        let (lower, upper) = iqr_bounds(&values, 1.5);
        assert!((lower - (1.75 - 2.25)).abs() < 1e-9);
        assert!((upper - (3.25 + 2.25)).abs() < 1e-9);
    }

    #[test]
    fn test_l2_normalize_rows() {
        let pairs = vec![
            PairScore {
                actor_user_id: 1,
                target_user_id: 10,
                score: 3.0,
            },
            PairScore {
                actor_user_id: 1,
                target_user_id: 11,
                score: 4.0,
            },
            PairScore {
                actor_user_id: 2,
                target_user_id: 10,
                score: 2.0,
            },
        ];
        let normalized = l2_normalize_rows(&pairs);
        assert!((normalized[0].score - 0.6).abs() < 1e-12);
        assert!((normalized[1].score - 0.8).abs() < 1e-12);
        // A single-entry row normalizes to unit length
        assert!((normalized[2].score - 1.0).abs() < 1e-12);

        // Per-actor norms are 1 afterwards
        let norm: f64 = normalized
            .iter()
            .filter(|p| p.actor_user_id == 1)
            .map(|p| p.score * p.score)
            .sum::<f64>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_compute_sparsity() {
        assert_eq!(compute_sparsity(0, 0, 0), 1.0);
        assert!((compute_sparsity(10, 10, 10) - 0.9).abs() < 1e-12);
    }
}
