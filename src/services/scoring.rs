/// Implicit-feedback event scoring
///
/// Maps (event_type, count) to a base score with per-type weights,
/// log-compression and per-type count caps so that no single high-frequency
/// type (views, messages) can dominate a pair score.
use serde::{Deserialize, Serialize};

use crate::models::EventType;

/// Scoring parameters: relative event weights and count caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringParams {
    pub message_weight: f64,
    pub comment_weight: f64,
    pub share_weight: f64,
    pub like_weight: f64,
    pub view_weight: f64,

    /// Per-window count caps. Messages and views are bursty, so they get
    /// much tighter caps than the default.
    pub message_cap: u32,
    pub view_cap: u32,
    pub default_cap: u32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            message_weight: 2.0,
            comment_weight: 2.0,
            share_weight: 1.5,
            like_weight: 1.0,
            view_weight: 0.1,
            message_cap: 20,
            view_cap: 50,
            default_cap: 300,
        }
    }
}

impl ScoringParams {
    pub fn weight(&self, event_type: EventType) -> f64 {
        match event_type {
            EventType::Message => self.message_weight,
            EventType::Comment => self.comment_weight,
            EventType::Share => self.share_weight,
            EventType::Like => self.like_weight,
            EventType::View => self.view_weight,
        }
    }

    pub fn cap(&self, event_type: EventType) -> u32 {
        match event_type {
            EventType::Message => self.message_cap,
            EventType::View => self.view_cap,
            _ => self.default_cap,
        }
    }

    /// Base score for `count` events of one type:
    /// `weight * ln(1 + min(count, cap))`, 0 for non-positive counts.
    pub fn event_score(&self, event_type: EventType, count: i64) -> f64 {
        if count <= 0 {
            return 0.0;
        }
        let w = self.weight(event_type);
        let capped = count.min(self.cap(event_type) as i64) as f64;
        w * capped.ln_1p()
    }

    pub fn validate(&self) -> Result<(), String> {
        let weights = [
            self.message_weight,
            self.comment_weight,
            self.share_weight,
            self.like_weight,
            self.view_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) {
            return Err("All event weights must be non-negative".to_string());
        }
        if self.message_cap == 0 || self.view_cap == 0 || self.default_cap == 0 {
            return Err("Count caps must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = ScoringParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.weight(EventType::Message), 2.0);
        assert_eq!(params.weight(EventType::View), 0.1);
        assert_eq!(params.cap(EventType::Message), 20);
        assert_eq!(params.cap(EventType::View), 50);
        assert_eq!(params.cap(EventType::Like), 300);
    }

    #[test]
    fn test_event_score_non_negative() {
        let params = ScoringParams::default();
        for et in EventType::ALL {
            for count in [-5, 0, 1, 10, 1000] {
                assert!(params.event_score(et, count) >= 0.0);
            }
        }
    }

    #[test]
    fn test_event_score_zero_count() {
        let params = ScoringParams::default();
        assert_eq!(params.event_score(EventType::Like, 0), 0.0);
        assert_eq!(params.event_score(EventType::Like, -3), 0.0);
    }

    #[test]
    fn test_event_score_formula() {
        let params = ScoringParams::default();
        // 2 likes: 1.0 * ln(1 + 2)
        let expected = 3.0_f64.ln();
        assert!((params.event_score(EventType::Like, 2) - expected).abs() < 1e-12);
        // 1 view: 0.1 * ln 2
        let expected = 0.1 * 2.0_f64.ln();
        assert!((params.event_score(EventType::View, 1) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_cap_idempotence() {
        let params = ScoringParams::default();
        // Past the cap the score stops growing
        assert_eq!(
            params.event_score(EventType::Message, 20),
            params.event_score(EventType::Message, 1020)
        );
        assert_eq!(
            params.event_score(EventType::View, 50),
            params.event_score(EventType::View, 10_050)
        );
    }

    #[test]
    fn test_validation() {
        let mut params = ScoringParams::default();
        params.view_weight = -0.1;
        assert!(params.validate().is_err());

        let mut params = ScoringParams::default();
        params.default_cap = 0;
        assert!(params.validate().is_err());
    }
}
