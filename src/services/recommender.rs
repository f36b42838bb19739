/// User-level recommendation engine and the service facade.
///
/// "Similar users" is the cheap single-hop shared-target similarity;
/// "recommended users" extends it two hops through the neighbor set with
/// event-score weighting and time decay. When propagation yields nothing the
/// caller falls back to the popularity ranking.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::Result;
use crate::models::{BlendStats, BlendStrategy, PostCandidate, UserScore};
use crate::services::candidates::{BlendConfig, BlendLayer, CandidateRequest};
use crate::services::scoring::ScoringParams;
use crate::store::EventStore;
use crate::utils::{days_ago, half_life_decay};

pub struct Recommender {
    store: Arc<dyn EventStore>,
    params: ScoringParams,
    blend: BlendLayer,
}

impl Recommender {
    pub fn new(store: Arc<dyn EventStore>, params: ScoringParams, blend_config: BlendConfig) -> Self {
        Self {
            store,
            params,
            blend: BlendLayer::new(blend_config),
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Single-hop similarity: users ranked by how many distinct targets they
    /// share with `user_id` inside the window. Reason tag: `shared_targets`.
    pub async fn similar_users(
        &self,
        user_id: i64,
        k: usize,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserScore>> {
        let cutoff = now - Duration::days(window_days);
        let rows = self.store.shared_target_counts(user_id, cutoff, k).await?;
        Ok(rows
            .into_iter()
            .map(|(other, shared)| UserScore {
                user_id: other,
                score: shared as f64,
                reason: "shared_targets",
            })
            .collect())
    }

    /// Two-hop weighted propagation. Targets the user has already engaged
    /// (or the user itself) never appear. Returns an empty list when no
    /// neighbor contributes anything; the caller applies `popular_users` as
    /// the fallback in that case.
    pub async fn recommend_users(
        &self,
        user_id: i64,
        k: usize,
        window_days: i64,
        neighbor_k: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserScore>> {
        let cutoff = now - Duration::days(window_days);

        let mut seen_targets = self.store.distinct_targets(user_id, cutoff).await?;
        seen_targets.insert(user_id);

        let neighbors = self
            .similar_users(user_id, neighbor_k, window_days, now)
            .await?;
        let neighbor_weights: HashMap<i64, f64> = neighbors
            .into_iter()
            .filter(|n| n.score > 0.0)
            .map(|n| (n.user_id, n.score))
            .collect();
        if neighbor_weights.is_empty() {
            return Ok(Vec::new());
        }
        let neighbor_ids: Vec<i64> = neighbor_weights.keys().copied().collect();

        let aggregates = self
            .store
            .neighbor_target_counts(&neighbor_ids, cutoff)
            .await?;

        let half_life = window_days as f64;
        let mut scores: HashMap<i64, f64> = HashMap::new();
        for row in aggregates {
            if seen_targets.contains(&row.target_user_id) {
                continue;
            }
            let base = self.params.event_score(row.event_type, row.count);
            if base <= 0.0 {
                continue;
            }
            let decay = half_life_decay(days_ago(row.last_occurred_at, now), half_life);
            let weight = neighbor_weights
                .get(&row.actor_user_id)
                .copied()
                .unwrap_or(0.0);
            let contribution = weight * base * decay;
            if contribution <= 0.0 {
                continue;
            }
            *scores.entry(row.target_user_id).or_insert(0.0) += contribution;
        }

        let mut recs: Vec<UserScore> = scores
            .into_iter()
            .map(|(target, score)| UserScore {
                user_id: target,
                score,
                reason: "neighbors_2hop_weighted",
            })
            .collect();
        recs.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        recs.truncate(k);

        info!(
            "2-hop recommendations: user_id={}, neighbors={}, results={}",
            user_id,
            neighbor_ids.len(),
            recs.len()
        );
        Ok(recs)
    }

    /// Popularity fallback: users ranked by decayed incoming engagement over
    /// the window. Excluded IDs (at minimum, the requesting user) never
    /// appear. Reason tag: `popular`.
    pub async fn popular_users(
        &self,
        exclude: &HashSet<i64>,
        k: usize,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserScore>> {
        let cutoff = now - Duration::days(window_days);
        let rows = self.store.incoming_target_counts(cutoff).await?;

        let half_life = window_days as f64;
        let mut scores: HashMap<i64, f64> = HashMap::new();
        for row in rows {
            if exclude.contains(&row.target_user_id) {
                continue;
            }
            let base = self.params.event_score(row.event_type, row.count);
            if base <= 0.0 {
                continue;
            }
            let decay = half_life_decay(days_ago(row.last_occurred_at, now), half_life);
            *scores.entry(row.target_user_id).or_insert(0.0) += base * decay;
        }

        let mut recs: Vec<UserScore> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(target, score)| UserScore {
                user_id: target,
                score,
                reason: "popular",
            })
            .collect();
        recs.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        recs.truncate(k);
        Ok(recs)
    }

    /// Blended post candidates for the feed.
    pub async fn post_candidates(
        &self,
        user_id: i64,
        k: usize,
        window_days: i64,
        strategy: BlendStrategy,
        now: DateTime<Utc>,
    ) -> Result<(Vec<PostCandidate>, BlendStats)> {
        let request = CandidateRequest {
            user_id,
            limit: k,
            window_days,
            now,
        };
        self.blend.generate(self.store.as_ref(), &request, strategy).await
    }
}
