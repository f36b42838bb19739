//! Post candidate engine: five independent scoring sources blended into one
//! ranked feed with per-source quotas and score-based deduplication.

mod cf;
mod content_based;
mod exploration;
mod social;
mod trending;

pub use cf::CfStrategy;
pub use content_based::ContentBasedStrategy;
pub use exploration::ExplorationStrategy;
pub use social::SocialStrategy;
pub use trending::TrendingStrategy;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::Result;
use crate::models::{BlendStats, BlendStrategy, PostCandidate, Source};
use crate::store::EventStore;

/// Request-scoped parameters shared by all candidate sources. `now` is
/// passed explicitly so tests can pin the reference instant.
#[derive(Debug, Clone)]
pub struct CandidateRequest {
    pub user_id: i64,
    pub limit: usize,
    pub window_days: i64,
    pub now: DateTime<Utc>,
}

impl CandidateRequest {
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.now - Duration::days(self.window_days)
    }

    /// Cutoff clamped to a short window, used by the recency-driven sources.
    pub fn short_cutoff(&self, max_days: i64) -> DateTime<Utc> {
        self.now - Duration::days(self.window_days.min(max_days))
    }
}

/// One independent candidate source.
#[async_trait]
pub trait CandidateStrategy: Send + Sync {
    /// Ranked candidates for the request, at most `request.limit`, never
    /// containing a post from `exclude`.
    async fn candidates(
        &self,
        store: &dyn EventStore,
        request: &CandidateRequest,
        exclude: &HashSet<i64>,
    ) -> Result<Vec<PostCandidate>>;

    fn source(&self) -> Source;
}

/// Blend-layer tuning knobs.
#[derive(Debug, Clone)]
pub struct BlendConfig {
    pub social_share: f64,
    pub cf_share: f64,
    pub trending_share: f64,
    pub content_based_share: f64,
    pub exploration_share: f64,

    pub cf_neighbor_k: usize,
    pub trending_min_engagement: f64,
    pub exploration_min_avg_engagement: f64,
    /// Fixed seed makes the exploration sample reproducible; `None` seeds
    /// from entropy.
    pub exploration_seed: Option<u64>,
    /// Recency-driven sources never look further back than this.
    pub short_window_days: i64,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            social_share: 0.30,
            cf_share: 0.40,
            trending_share: 0.20,
            content_based_share: 0.05,
            exploration_share: 0.05,
            cf_neighbor_k: 50,
            trending_min_engagement: 1.0,
            exploration_min_avg_engagement: 0.5,
            exploration_seed: None,
            short_window_days: 7,
        }
    }
}

impl BlendConfig {
    fn share_for(&self, source: Source) -> f64 {
        match source {
            Source::Social => self.social_share,
            Source::Cf => self.cf_share,
            Source::Trending => self.trending_share,
            Source::ContentBased => self.content_based_share,
            Source::Exploration => self.exploration_share,
        }
    }
}

/// Runs the sources in fixed order and merges their output.
pub struct BlendLayer {
    strategies: Vec<Box<dyn CandidateStrategy>>,
    config: BlendConfig,
}

impl BlendLayer {
    pub fn new(config: BlendConfig) -> Self {
        let strategies: Vec<Box<dyn CandidateStrategy>> = vec![
            Box::new(SocialStrategy::new(config.short_window_days)),
            Box::new(CfStrategy::new(config.cf_neighbor_k)),
            Box::new(TrendingStrategy::new(
                config.short_window_days,
                config.trending_min_engagement,
            )),
            Box::new(ContentBasedStrategy::new()),
            Box::new(ExplorationStrategy::new(
                config.short_window_days,
                config.exploration_min_avg_engagement,
                config.exploration_seed,
            )),
        ];
        Self { strategies, config }
    }

    /// Generate the blended candidate list for one request.
    ///
    /// Multi-source: each source gets a quota of `round(k * share)` and must
    /// exclude everything earlier sources returned. Single-source strategies
    /// run exactly one source at full `k`. The final pass deduplicates by
    /// post, keeping the higher score, then sorts and truncates.
    pub async fn generate(
        &self,
        store: &dyn EventStore,
        request: &CandidateRequest,
        strategy: BlendStrategy,
    ) -> Result<(Vec<PostCandidate>, BlendStats)> {
        let mut all_candidates: Vec<PostCandidate> = Vec::new();
        let mut selected: HashSet<i64> = HashSet::new();
        let mut stats = BlendStats::default();

        let only = match strategy {
            BlendStrategy::MultiSource => None,
            BlendStrategy::SocialOnly => Some(Source::Social),
            BlendStrategy::CfOnly => Some(Source::Cf),
            BlendStrategy::TrendingOnly => Some(Source::Trending),
        };

        for source_impl in &self.strategies {
            let source = source_impl.source();
            let quota = match only {
                Some(wanted) if wanted == source => request.limit,
                Some(_) => continue,
                None => {
                    (request.limit as f64 * self.config.share_for(source)).round() as usize
                }
            };
            if quota == 0 {
                continue;
            }

            let sub_request = CandidateRequest {
                limit: quota,
                ..request.clone()
            };
            let candidates = source_impl
                .candidates(store, &sub_request, &selected)
                .await?;
            stats.record(source, candidates.len());
            selected.extend(candidates.iter().map(|c| c.post_id));
            all_candidates.extend(candidates);
        }

        // Deduplicate by post, keeping the higher-scored candidate. The
        // sequential exclusion set makes cross-source duplicates rare, but a
        // single-source strategy reusing cached layers may still produce
        // them.
        let mut by_post: HashMap<i64, PostCandidate> = HashMap::new();
        for candidate in all_candidates {
            match by_post.get(&candidate.post_id) {
                Some(existing) if existing.score >= candidate.score => {}
                _ => {
                    by_post.insert(candidate.post_id, candidate);
                }
            }
        }

        let mut merged: Vec<PostCandidate> = by_post.into_values().collect();
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        merged.truncate(request.limit);
        stats.final_count = merged.len();

        info!(
            "Blend completed: user_id={}, strategy={}, social={}, cf={}, trending={}, content_based={}, exploration={}, final={}",
            request.user_id,
            strategy.as_str(),
            stats.social_count,
            stats.cf_count,
            stats.trending_count,
            stats.content_based_count,
            stats.exploration_count,
            stats.final_count
        );

        Ok((merged, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shares_sum_to_one() {
        let config = BlendConfig::default();
        let total = config.social_share
            + config.cf_share
            + config.trending_share
            + config.content_based_share
            + config.exploration_share;
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_short_cutoff_clamps() {
        let now = Utc::now();
        let request = CandidateRequest {
            user_id: 1,
            limit: 10,
            window_days: 30,
            now,
        };
        assert_eq!(request.short_cutoff(7), now - Duration::days(7));

        let narrow = CandidateRequest {
            window_days: 3,
            ..request
        };
        assert_eq!(narrow.short_cutoff(7), now - Duration::days(3));
    }
}
