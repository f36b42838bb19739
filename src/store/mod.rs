//! Storage interface for the recommendation pipeline.
//!
//! The event log is the sole source of truth; everything else is derived.
//! Grouping and aggregation are pushed down to the store where beneficial,
//! so most reads return pre-grouped rows rather than raw events.

mod memory;
mod postgres;

pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::models::{
    EventType, InteractionEvent, PairScore, PostEngagement, UserNeighbor, UserProfileFeatures,
};

/// Filter for raw event queries.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub actor_id: Option<i64>,
    pub target_id: Option<i64>,
    pub content_id: Option<i64>,
    pub occurred_after: Option<DateTime<Utc>>,
}

/// One (actor, target, calendar day, event type) group from the event log.
#[derive(Debug, Clone)]
pub struct DailyPairCount {
    pub actor_user_id: i64,
    pub target_user_id: i64,
    pub day: NaiveDate,
    pub event_type: EventType,
    pub count: i64,
    pub last_occurred_at: DateTime<Utc>,
}

/// One (actor, post, calendar day, event type) group from the event log.
#[derive(Debug, Clone)]
pub struct DailyPostCount {
    pub actor_user_id: i64,
    pub post_id: i64,
    pub day: NaiveDate,
    pub event_type: EventType,
    pub count: i64,
    pub last_occurred_at: DateTime<Utc>,
}

/// Per (actor, target, event type) aggregate over the whole window. Used by
/// the 2-hop propagation, where the actors are the requester's neighbors.
#[derive(Debug, Clone)]
pub struct NeighborTargetCount {
    pub actor_user_id: i64,
    pub target_user_id: i64,
    pub event_type: EventType,
    pub count: i64,
    pub last_occurred_at: DateTime<Utc>,
}

/// Incoming engagement grouped per (target user, event type). Feeds the
/// popularity fallback.
#[derive(Debug, Clone)]
pub struct TargetTypeCount {
    pub target_user_id: i64,
    pub event_type: EventType,
    pub count: i64,
    pub last_occurred_at: DateTime<Utc>,
}

/// A post joined with the number of engagement rows it has accumulated.
#[derive(Debug, Clone)]
pub struct PostActivity {
    pub post_id: i64,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
    pub engagement_count: i64,
}

/// Global per-post engagement aggregate for the trending source.
#[derive(Debug, Clone)]
pub struct TrendingAggregate {
    pub post_id: i64,
    pub total_engagement: f64,
    pub distinct_engagers: i64,
    pub last_interaction_at: DateTime<Utc>,
}

/// One (user, post, engagement score) row for the CF source.
#[derive(Debug, Clone)]
pub struct UserEngagementRow {
    pub user_id: i64,
    pub post_id: i64,
    pub engagement_score: f64,
}

/// Per-actor activity summary used to build profile features.
#[derive(Debug, Clone)]
pub struct ActorActivity {
    pub user_id: i64,
    pub total_interactions: i64,
    pub event_type_counts: Vec<(EventType, i64)>,
    pub unique_posts: i64,
    pub unique_users: i64,
    pub last_active_at: DateTime<Utc>,
}

/// Read/write interface consumed by the pipeline.
///
/// Upserts are idempotent insert-or-update keyed by the aggregate's natural
/// primary key, so concurrent refreshes are safe to retry. Ordered reads
/// return rows sorted by their score/count descending.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Raw event read; grouping-free escape hatch.
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<InteractionEvent>>;

    // Grouped reads over the event log.
    async fn daily_pair_counts(&self, cutoff: DateTime<Utc>) -> Result<Vec<DailyPairCount>>;
    async fn daily_post_counts(&self, cutoff: DateTime<Utc>) -> Result<Vec<DailyPostCount>>;
    async fn distinct_targets(&self, user_id: i64, cutoff: DateTime<Utc>) -> Result<HashSet<i64>>;
    /// (other user, shared distinct target count), descending, at most `limit`.
    async fn shared_target_counts(
        &self,
        user_id: i64,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(i64, i64)>>;
    async fn neighbor_target_counts(
        &self,
        neighbor_ids: &[i64],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<NeighborTargetCount>>;
    async fn incoming_target_counts(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<TargetTypeCount>>;
    async fn actor_activity(&self, cutoff: DateTime<Utc>) -> Result<Vec<ActorActivity>>;

    // Post-side reads.
    async fn recent_posts_by_authors(
        &self,
        author_ids: &[i64],
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PostActivity>>;
    async fn seen_post_ids(&self, user_id: i64, cutoff: DateTime<Utc>) -> Result<HashSet<i64>>;
    /// (post_id, author_id) of posts the user engaged with in the window.
    async fn engaged_post_authors(
        &self,
        user_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(i64, i64)>>;
    /// Engagement rows of the given users, highest score first.
    async fn engagements_by_users(
        &self,
        user_ids: &[i64],
        limit: usize,
    ) -> Result<Vec<UserEngagementRow>>;
    async fn trending_aggregates(
        &self,
        cutoff: DateTime<Utc>,
        min_total: f64,
        limit: usize,
    ) -> Result<Vec<TrendingAggregate>>;
    /// (post_id, avg engagement) of posts whose average engagement meets the
    /// quality floor.
    async fn exploration_pool(
        &self,
        cutoff: DateTime<Utc>,
        min_avg_engagement: f64,
        limit: usize,
    ) -> Result<Vec<(i64, f64)>>;

    // Derived-aggregate writes, idempotent per natural key.
    async fn upsert_pair_scores(&self, rows: &[PairScore]) -> Result<u64>;
    async fn upsert_post_engagement(&self, rows: &[PostEngagement]) -> Result<u64>;
    async fn upsert_profile_features(&self, rows: &[UserProfileFeatures]) -> Result<u64>;
    async fn upsert_user_neighbors(&self, rows: &[UserNeighbor]) -> Result<u64>;

    // Derived-aggregate reads.
    async fn read_post_engagement(&self, user_id: i64) -> Result<Vec<PostEngagement>>;
    async fn read_profile_features(&self, user_id: i64) -> Result<Option<UserProfileFeatures>>;
    async fn read_user_neighbors(&self, user_id: i64, k: usize) -> Result<Vec<UserNeighbor>>;
}
