// Time utilities for decay-based scoring

use chrono::{DateTime, Utc};

/// Fractional days elapsed between `when` and `reference`.
///
/// Positive when `when` is in the past relative to `reference`. Both instants
/// are UTC; callers that parse zone-less timestamps must treat them as UTC
/// before calling this.
pub fn days_ago(when: DateTime<Utc>, reference: DateTime<Utc>) -> f64 {
    let delta = reference.signed_duration_since(when);
    delta.num_milliseconds() as f64 / 86_400_000.0
}

/// Half-life time decay in (0, 1].
///
/// - days = 0          -> 1.0
/// - days = half_life  -> 0.5
/// - days = 2 * T      -> 0.25
///
/// A non-positive half-life or a non-positive age disables decay (1.0).
pub fn half_life_decay(days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 || days <= 0.0 {
        return 1.0;
    }
    2.0_f64.powf(-(days / half_life_days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_half_life_decay_points() {
        // At the half-life the weight is exactly 0.5
        assert!((half_life_decay(30.0, 30.0) - 0.5).abs() < 1e-12);
        assert!((half_life_decay(60.0, 30.0) - 0.25).abs() < 1e-12);

        // Zero age decays to 1.0
        assert_eq!(half_life_decay(0.0, 30.0), 1.0);
    }

    #[test]
    fn test_half_life_decay_degenerate() {
        assert_eq!(half_life_decay(10.0, 0.0), 1.0);
        assert_eq!(half_life_decay(10.0, -5.0), 1.0);
        assert_eq!(half_life_decay(-3.0, 30.0), 1.0);
    }

    #[test]
    fn test_half_life_decay_monotonic() {
        let mut prev = half_life_decay(0.0, 7.0);
        for d in 1..=60 {
            let cur = half_life_decay(d as f64, 7.0);
            assert!(cur <= prev, "decay must not increase with age");
            prev = cur;
        }
    }

    #[test]
    fn test_days_ago() {
        let reference = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let when = Utc.with_ymd_and_hms(2025, 6, 14, 0, 0, 0).unwrap();
        assert!((days_ago(when, reference) - 1.5).abs() < 1e-9);

        // Future instants come back negative
        let future = Utc.with_ymd_and_hms(2025, 6, 16, 12, 0, 0).unwrap();
        assert!((days_ago(future, reference) + 1.0).abs() < 1e-9);
    }
}
