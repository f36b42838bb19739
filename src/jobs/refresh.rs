//! Periodic refresh jobs.
//!
//! `AggregateRefreshJob` rebuilds the derived per-pair, per-post and
//! per-user aggregates from the event log. `NeighborRefreshJob` runs the
//! expensive similarity pass and rewrites the per-user neighbor lists.
//! Both are designed to run as a cron job or a standalone looping process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{PostEngagement, UserProfileFeatures};
use crate::services::matrix::{build_matrix, topk_neighbors};
use crate::services::preprocess::{
    aggregate_pair_scores, compute_sparsity, iqr_bounds, l2_normalize_rows,
};
use crate::services::scoring::ScoringParams;
use crate::store::{DailyPostCount, EventStore};
use crate::utils::{days_ago, half_life_decay};

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub window_days: i64,
    pub half_life_days: f64,
    pub topk_per_actor: usize,
    pub neighbor_k: usize,
    pub run_once: bool,
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            half_life_days: 7.0,
            topk_per_actor: 200,
            neighbor_k: 50,
            run_once: true,
            interval_secs: 3600,
        }
    }
}

impl RefreshConfig {
    pub fn from_pipeline(pipeline: &PipelineConfig) -> Self {
        Self {
            window_days: pipeline.window_days,
            half_life_days: pipeline.half_life_days,
            topk_per_actor: pipeline.topk_per_actor,
            neighbor_k: pipeline.neighbor_k,
            run_once: pipeline.run_once,
            interval_secs: pipeline.interval_secs,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshStats {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pair_scores_written: u64,
    pub post_engagements_written: u64,
    pub profiles_written: u64,
    pub neighbors_written: u64,
    pub total_duration_ms: u64,
}

/// Rebuilds the pair-score cache, per-post engagement aggregates and
/// per-user profile features from the event log.
pub struct AggregateRefreshJob {
    config: RefreshConfig,
    store: Arc<dyn EventStore>,
    params: ScoringParams,
}

impl AggregateRefreshJob {
    pub fn new(config: RefreshConfig, store: Arc<dyn EventStore>, params: ScoringParams) -> Self {
        Self {
            config,
            store,
            params,
        }
    }

    pub async fn run(&self) -> Result<RefreshStats> {
        loop {
            let stats = self.run_single_pass(Utc::now()).await?;

            info!(
                pair_scores = stats.pair_scores_written,
                post_engagements = stats.post_engagements_written,
                profiles = stats.profiles_written,
                duration_ms = stats.total_duration_ms,
                "Aggregate refresh pass completed"
            );

            if self.config.run_once {
                return Ok(stats);
            }

            info!(
                interval_secs = self.config.interval_secs,
                "Sleeping until next pass"
            );
            sleep(Duration::from_secs(self.config.interval_secs)).await;
        }
    }

    pub async fn run_single_pass(&self, now: DateTime<Utc>) -> Result<RefreshStats> {
        let start_time = Instant::now();
        let mut stats = RefreshStats {
            started_at: Some(now),
            ..Default::default()
        };
        let cutoff = now - chrono::Duration::days(self.config.window_days);

        info!(
            window_days = self.config.window_days,
            half_life_days = self.config.half_life_days,
            "Starting aggregate refresh pass"
        );

        let pair_rows = self.store.daily_pair_counts(cutoff).await?;
        let pair_scores =
            aggregate_pair_scores(&pair_rows, &self.params, now, self.config.half_life_days);
        stats.pair_scores_written = self.store.upsert_pair_scores(&pair_scores).await?;

        let post_rows = self.store.daily_post_counts(cutoff).await?;
        let engagements = aggregate_post_engagement(
            &post_rows,
            &self.params,
            now,
            self.config.half_life_days,
        );
        stats.post_engagements_written = self.store.upsert_post_engagement(&engagements).await?;

        let activity = self.store.actor_activity(cutoff).await?;
        let profiles: Vec<UserProfileFeatures> = activity
            .into_iter()
            .map(|a| {
                let counts: HashMap<&str, i64> = a
                    .event_type_counts
                    .iter()
                    .map(|(et, count)| (et.as_str(), *count))
                    .collect();
                UserProfileFeatures {
                    user_id: a.user_id,
                    total_interactions: a.total_interactions,
                    event_type_counts: serde_json::json!(counts),
                    unique_posts: a.unique_posts,
                    unique_users: a.unique_users,
                    last_active_at: a.last_active_at,
                }
            })
            .collect();
        stats.profiles_written = self.store.upsert_profile_features(&profiles).await?;

        stats.completed_at = Some(Utc::now());
        stats.total_duration_ms = start_time.elapsed().as_millis() as u64;
        Ok(stats)
    }
}

/// Rebuilds the per-user neighbor lists: pair aggregation, per-actor top-k
/// pruning, sparse matrix construction, cosine top-k.
pub struct NeighborRefreshJob {
    config: RefreshConfig,
    store: Arc<dyn EventStore>,
    params: ScoringParams,
}

impl NeighborRefreshJob {
    pub fn new(config: RefreshConfig, store: Arc<dyn EventStore>, params: ScoringParams) -> Self {
        Self {
            config,
            store,
            params,
        }
    }

    pub async fn run(&self) -> Result<RefreshStats> {
        loop {
            let stats = self.run_single_pass(Utc::now()).await?;

            info!(
                neighbors = stats.neighbors_written,
                duration_ms = stats.total_duration_ms,
                "Neighbor refresh pass completed"
            );

            if self.config.run_once {
                return Ok(stats);
            }

            info!(
                interval_secs = self.config.interval_secs,
                "Sleeping until next pass"
            );
            sleep(Duration::from_secs(self.config.interval_secs)).await;
        }
    }

    pub async fn run_single_pass(&self, now: DateTime<Utc>) -> Result<RefreshStats> {
        let start_time = Instant::now();
        let mut stats = RefreshStats {
            started_at: Some(now),
            ..Default::default()
        };
        let cutoff = now - chrono::Duration::days(self.config.window_days);

        let pair_rows = self.store.daily_pair_counts(cutoff).await?;
        let mut pair_scores =
            aggregate_pair_scores(&pair_rows, &self.params, now, self.config.half_life_days);

        // Clip outlying scores, then unit-norm each actor row so the cosine
        // pass is not dominated by hyperactive users.
        let values: Vec<f64> = pair_scores.iter().map(|p| p.score).collect();
        let (_, upper) = iqr_bounds(&values, 1.5);
        if upper > 0.0 {
            for p in &mut pair_scores {
                p.score = p.score.min(upper);
            }
        }
        let pair_scores = l2_normalize_rows(&pair_scores);

        let (matrix, index) = build_matrix(&pair_scores, self.config.topk_per_actor);
        info!(
            rows = matrix.rows,
            cols = matrix.cols,
            nnz = matrix.nnz(),
            sparsity = compute_sparsity(matrix.rows, matrix.cols, matrix.nnz()),
            "Built interaction matrix"
        );

        let neighbors = topk_neighbors(&matrix, &index, self.config.neighbor_k);
        stats.neighbors_written = self.store.upsert_user_neighbors(&neighbors).await?;

        stats.completed_at = Some(Utc::now());
        stats.total_duration_ms = start_time.elapsed().as_millis() as u64;
        Ok(stats)
    }
}

/// Collapse daily per-type post counts into one engagement row per
/// (user, post): decayed weighted score, raw interaction count, latest
/// occurrence and a per-type breakdown.
fn aggregate_post_engagement(
    rows: &[DailyPostCount],
    params: &ScoringParams,
    now: DateTime<Utc>,
    half_life_days: f64,
) -> Vec<PostEngagement> {
    struct Acc {
        score: f64,
        count: i64,
        last: DateTime<Utc>,
        breakdown: HashMap<&'static str, i64>,
    }

    let mut by_pair: HashMap<(i64, i64), Acc> = HashMap::new();
    for row in rows {
        let base = params.event_score(row.event_type, row.count);
        let decay = half_life_decay(days_ago(row.last_occurred_at, now), half_life_days);
        let acc = by_pair
            .entry((row.actor_user_id, row.post_id))
            .or_insert_with(|| Acc {
                score: 0.0,
                count: 0,
                last: row.last_occurred_at,
                breakdown: HashMap::new(),
            });
        acc.score += base * decay;
        acc.count += row.count;
        if row.last_occurred_at > acc.last {
            acc.last = row.last_occurred_at;
        }
        *acc.breakdown.entry(row.event_type.as_str()).or_insert(0) += row.count;
    }

    let mut out: Vec<PostEngagement> = by_pair
        .into_iter()
        .filter(|(_, acc)| acc.score > 0.0)
        .map(|((user_id, post_id), acc)| PostEngagement {
            user_id,
            post_id,
            engagement_score: acc.score,
            interaction_count: acc.count,
            last_interaction_at: acc.last,
            event_breakdown: serde_json::json!(acc.breakdown),
        })
        .collect();
    out.sort_by_key(|e| (e.user_id, e.post_id));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, InteractionEvent};
    use chrono::TimeZone;

    fn event(
        actor: i64,
        target: i64,
        event_type: EventType,
        occurred_at: DateTime<Utc>,
        content_id: Option<i64>,
    ) -> InteractionEvent {
        InteractionEvent {
            id: uuid::Uuid::new_v4(),
            actor_user_id: actor,
            target_user_id: target,
            event_type,
            occurred_at,
            value: None,
            content_id,
            session_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_refresh_config_defaults() {
        let config = RefreshConfig::default();
        assert_eq!(config.window_days, 30);
        assert!(config.run_once);
    }

    #[test]
    fn test_aggregate_post_engagement_merges_days() {
        let params = ScoringParams::default();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::days(1);
        let now = t0 + chrono::Duration::days(2);

        let rows = vec![
            DailyPostCount {
                actor_user_id: 1,
                post_id: 100,
                day: chrono::NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
                event_type: EventType::Like,
                count: 1,
                last_occurred_at: t0,
            },
            DailyPostCount {
                actor_user_id: 1,
                post_id: 100,
                day: chrono::NaiveDate::from_ymd_opt(2025, 5, 2).unwrap(),
                event_type: EventType::Comment,
                count: 2,
                last_occurred_at: t1,
            },
        ];

        let engagements = aggregate_post_engagement(&rows, &params, now, 7.0);
        assert_eq!(engagements.len(), 1);
        let e = &engagements[0];
        assert_eq!(e.interaction_count, 3);
        assert_eq!(e.last_interaction_at, t1);

        let expected = 2.0_f64.ln() * half_life_decay(2.0, 7.0)
            + 2.0 * 3.0_f64.ln() * half_life_decay(1.0, 7.0);
        assert!((e.engagement_score - expected).abs() < 1e-9);

        assert_eq!(e.event_breakdown["like"], 1);
        assert_eq!(e.event_breakdown["comment"], 2);
    }

    #[tokio::test]
    async fn test_neighbor_refresh_writes_symmetric_pairs() {
        use crate::store::MemoryEventStore;

        let store = Arc::new(MemoryEventStore::new());
        let t = Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap();
        // Two actors engaging the same target become mutual neighbors.
        store.push_event(event(1, 50, EventType::Like, t, None));
        store.push_event(event(2, 50, EventType::Like, t, None));

        let job = NeighborRefreshJob::new(
            RefreshConfig::default(),
            store.clone(),
            ScoringParams::default(),
        );
        let stats = job
            .run_single_pass(t + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(stats.neighbors_written, 2);

        let neighbors = store.read_user_neighbors(1, 10).await.unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].neighbor_id, 2);
        assert!((neighbors[0].similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_aggregate_refresh_writes_all_aggregates() {
        use crate::store::MemoryEventStore;

        let store = Arc::new(MemoryEventStore::new());
        let t = Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap();
        store.push_event(event(1, 2, EventType::Like, t, Some(100)));
        store.push_event(event(1, 3, EventType::Comment, t, None));

        let job = AggregateRefreshJob::new(
            RefreshConfig::default(),
            store.clone(),
            ScoringParams::default(),
        );
        let stats = job
            .run_single_pass(t + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(stats.pair_scores_written, 2);
        assert_eq!(stats.post_engagements_written, 1);
        assert_eq!(stats.profiles_written, 1);

        let profile = store.read_profile_features(1).await.unwrap().unwrap();
        assert_eq!(profile.total_interactions, 2);
        assert_eq!(profile.unique_users, 2);
    }
}
