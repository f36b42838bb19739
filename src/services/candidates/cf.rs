use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tracing::debug;

use super::{CandidateRequest, CandidateStrategy};
use crate::error::Result;
use crate::models::{PostCandidate, Source};
use crate::store::EventStore;

/// Collaborative-filtering source: posts engaged by the requester's
/// neighbors, excluding posts the requester has already seen.
///
/// Neighbor weights come from the persisted cosine neighbor table, which the
/// batch job refreshes. Users the job has not covered yet fall back to
/// shared-target counts so a fresh deployment still produces candidates.
/// A candidate's score is the sum over neighbors of
/// `engagement_score(neighbor, post) * neighbor_similarity`.
pub struct CfStrategy {
    neighbor_k: usize,
}

impl CfStrategy {
    pub fn new(neighbor_k: usize) -> Self {
        Self { neighbor_k }
    }

    async fn neighbor_weights(
        &self,
        store: &dyn EventStore,
        request: &CandidateRequest,
    ) -> Result<HashMap<i64, f64>> {
        let persisted = store
            .read_user_neighbors(request.user_id, self.neighbor_k)
            .await?;
        if !persisted.is_empty() {
            return Ok(persisted
                .into_iter()
                .map(|n| (n.neighbor_id, n.similarity))
                .collect());
        }

        debug!(
            "CF source: no persisted neighbors for user {}, using shared-target counts",
            request.user_id
        );
        let shared = store
            .shared_target_counts(request.user_id, request.cutoff(), self.neighbor_k)
            .await?;
        Ok(shared
            .into_iter()
            .map(|(id, count)| (id, count as f64))
            .collect())
    }
}

#[async_trait]
impl CandidateStrategy for CfStrategy {
    async fn candidates(
        &self,
        store: &dyn EventStore,
        request: &CandidateRequest,
        exclude: &HashSet<i64>,
    ) -> Result<Vec<PostCandidate>> {
        let neighbor_weights = self.neighbor_weights(store, request).await?;
        if neighbor_weights.is_empty() {
            debug!("CF source: user {} has no neighbors", request.user_id);
            return Ok(Vec::new());
        }
        let neighbor_ids: Vec<i64> = neighbor_weights.keys().copied().collect();

        let seen = store
            .seen_post_ids(request.user_id, request.cutoff())
            .await?;

        // Over-fetch so aggregation across neighbors has enough rows left
        // after exclusion.
        let rows = store
            .engagements_by_users(&neighbor_ids, request.limit * 2)
            .await?;

        let mut post_scores: HashMap<i64, f64> = HashMap::new();
        for row in rows {
            if seen.contains(&row.post_id) || exclude.contains(&row.post_id) {
                continue;
            }
            let weight = neighbor_weights.get(&row.user_id).copied().unwrap_or(0.0);
            if weight > 0.0 {
                *post_scores.entry(row.post_id).or_insert(0.0) +=
                    row.engagement_score * weight;
            }
        }

        let mut candidates: Vec<PostCandidate> = post_scores
            .into_iter()
            .map(|(post_id, score)| PostCandidate {
                post_id,
                score,
                source: Source::Cf,
                reason: "collaborative_filtering",
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        candidates.truncate(request.limit);
        Ok(candidates)
    }

    fn source(&self) -> Source {
        Source::Cf
    }
}
