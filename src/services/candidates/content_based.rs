use std::collections::HashSet;

use async_trait::async_trait;

use super::{CandidateRequest, CandidateStrategy};
use crate::error::Result;
use crate::models::{PostCandidate, Source};
use crate::store::EventStore;
use crate::utils::{days_ago, half_life_decay};

/// Content-based source: newer posts by authors whose earlier posts the
/// requester engaged with, already-seen posts excluded. Scored purely by
/// recency with a 7-day half-life.
pub struct ContentBasedStrategy;

const CONTENT_HALF_LIFE_DAYS: f64 = 7.0;

impl ContentBasedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ContentBasedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandidateStrategy for ContentBasedStrategy {
    async fn candidates(
        &self,
        store: &dyn EventStore,
        request: &CandidateRequest,
        exclude: &HashSet<i64>,
    ) -> Result<Vec<PostCandidate>> {
        let cutoff = request.cutoff();

        let engaged = store
            .engaged_post_authors(request.user_id, cutoff)
            .await?;
        if engaged.is_empty() {
            return Ok(Vec::new());
        }
        let seen: HashSet<i64> = engaged.iter().map(|(post_id, _)| *post_id).collect();
        let author_ids: Vec<i64> = {
            let set: HashSet<i64> = engaged.iter().map(|(_, author_id)| *author_id).collect();
            set.into_iter().collect()
        };

        let posts = store
            .recent_posts_by_authors(&author_ids, cutoff, request.limit * 2)
            .await?;

        let mut candidates: Vec<PostCandidate> = posts
            .into_iter()
            .filter(|p| !seen.contains(&p.post_id) && !exclude.contains(&p.post_id))
            .map(|p| PostCandidate {
                post_id: p.post_id,
                score: half_life_decay(days_ago(p.created_at, request.now), CONTENT_HALF_LIFE_DAYS),
                source: Source::ContentBased,
                reason: "content_based_same_author",
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
        Source::ContentBased
    }
}
