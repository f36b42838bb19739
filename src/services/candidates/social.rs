use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

use super::{CandidateRequest, CandidateStrategy};
use crate::error::Result;
use crate::models::{PostCandidate, Source};
use crate::store::EventStore;
use crate::utils::{days_ago, half_life_decay};

/// Social-graph source: recent posts by users the requester interacts with.
///
/// Score: `decay(post_age, 7d) * (1 + min(engagement_count / 10, 1))`, so a
/// fresh post from a followed author always beats a stale one, with a small
/// boost for posts that already collect engagement.
pub struct SocialStrategy {
    short_window_days: i64,
}

const SOCIAL_HALF_LIFE_DAYS: f64 = 7.0;

impl SocialStrategy {
    pub fn new(short_window_days: i64) -> Self {
        Self { short_window_days }
    }
}

#[async_trait]
impl CandidateStrategy for SocialStrategy {
    async fn candidates(
        &self,
        store: &dyn EventStore,
        request: &CandidateRequest,
        exclude: &HashSet<i64>,
    ) -> Result<Vec<PostCandidate>> {
        let cutoff = request.short_cutoff(self.short_window_days);

        let following = store.distinct_targets(request.user_id, cutoff).await?;
        if following.is_empty() {
            debug!(
                "Social source: user {} has no interaction partners in window",
                request.user_id
            );
            return Ok(Vec::new());
        }

        let author_ids: Vec<i64> = following.into_iter().collect();
        let posts = store
            .recent_posts_by_authors(&author_ids, cutoff, request.limit)
            .await?;

        let mut candidates: Vec<PostCandidate> = posts
            .into_iter()
            .filter(|p| !exclude.contains(&p.post_id))
            .map(|p| {
                let recency = half_life_decay(
                    days_ago(p.created_at, request.now),
                    SOCIAL_HALF_LIFE_DAYS,
                );
                let engagement = (p.engagement_count as f64 / 10.0).min(1.0);
                PostCandidate {
                    post_id: p.post_id,
                    score: recency * (1.0 + engagement),
                    source: Source::Social,
                    reason: "social_graph",
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
        Source::Social
    }
}
