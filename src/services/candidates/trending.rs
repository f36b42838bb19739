use std::collections::HashSet;

use async_trait::async_trait;

use super::{CandidateRequest, CandidateStrategy};
use crate::error::Result;
use crate::models::{PostCandidate, Source};
use crate::store::EventStore;
use crate::utils::{days_ago, half_life_decay};

/// Trending source: globally aggregated engagement over a short window.
///
/// Score: `total * decay(last_interaction_age, 3d) * (1 + 0.2 * min(distinct_engagers / 50, 1))`.
/// The distinct-engager term rewards posts that many different users touch
/// over posts one user hammers.
pub struct TrendingStrategy {
    short_window_days: i64,
    min_engagement: f64,
}

const TRENDING_HALF_LIFE_DAYS: f64 = 3.0;

impl TrendingStrategy {
    pub fn new(short_window_days: i64, min_engagement: f64) -> Self {
        Self {
            short_window_days,
            min_engagement,
        }
    }
}

#[async_trait]
impl CandidateStrategy for TrendingStrategy {
    async fn candidates(
        &self,
        store: &dyn EventStore,
        request: &CandidateRequest,
        exclude: &HashSet<i64>,
    ) -> Result<Vec<PostCandidate>> {
        let cutoff = request.short_cutoff(self.short_window_days);

        let rows = store
            .trending_aggregates(cutoff, self.min_engagement, request.limit * 2)
            .await?;

        let mut candidates: Vec<PostCandidate> = rows
            .into_iter()
            .filter(|r| !exclude.contains(&r.post_id))
            .map(|r| {
                let recency = half_life_decay(
                    days_ago(r.last_interaction_at, request.now),
                    TRENDING_HALF_LIFE_DAYS,
                );
                let diversity = (r.distinct_engagers as f64 / 50.0).min(1.0);
                PostCandidate {
                    post_id: r.post_id,
                    score: r.total_engagement * recency * (1.0 + 0.2 * diversity),
                    source: Source::Trending,
                    reason: "trending",
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(request.limit);
        Ok(candidates)
    }

    fn source(&self) -> Source {
        Source::Trending
    }
}
