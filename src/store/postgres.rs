//! Postgres `EventStore` backed by sqlx.
//!
//! Grouping and HAVING filters are pushed into SQL; upserts use
//! `ON CONFLICT ... DO UPDATE` keyed by each aggregate's natural primary
//! key, so retries and concurrent refreshes are idempotent. Schema
//! provisioning and connection management live outside this service.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    ActorActivity, DailyPairCount, DailyPostCount, EventFilter, EventStore, NeighborTargetCount,
    PostActivity, TargetTypeCount, TrendingAggregate, UserEngagementRow,
};
use crate::error::Result;
use crate::models::{
    EventType, InteractionEvent, PairScore, PostEngagement, UserNeighbor, UserProfileFeatures,
};

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    actor_user_id: i64,
    target_user_id: i64,
    event_type: String,
    occurred_at: DateTime<Utc>,
    value: Option<f64>,
    content_id: Option<i64>,
    session_id: Option<String>,
    metadata: serde_json::Value,
}

impl EventRow {
    /// Rows with an event type this service does not score are skipped;
    /// ingestion validation should have rejected them upstream.
    fn into_event(self) -> Option<InteractionEvent> {
        let event_type = EventType::parse(&self.event_type)?;
        Some(InteractionEvent {
            id: self.id,
            actor_user_id: self.actor_user_id,
            target_user_id: self.target_user_id,
            event_type,
            occurred_at: self.occurred_at,
            value: self.value,
            content_id: self.content_id,
            session_id: self.session_id,
            metadata: self.metadata,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DailyPairRow {
    actor_user_id: i64,
    target_user_id: i64,
    day: NaiveDate,
    event_type: String,
    count: i64,
    last_occurred_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct DailyPostRow {
    actor_user_id: i64,
    post_id: i64,
    day: NaiveDate,
    event_type: String,
    count: i64,
    last_occurred_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TypeCountRow {
    actor_user_id: i64,
    target_user_id: i64,
    event_type: String,
    count: i64,
    last_occurred_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TargetTypeRow {
    target_user_id: i64,
    event_type: String,
    count: i64,
    last_occurred_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ActivitySummaryRow {
    actor_user_id: i64,
    total_interactions: i64,
    unique_posts: i64,
    unique_users: i64,
    last_active_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ActivityTypeRow {
    actor_user_id: i64,
    event_type: String,
    count: i64,
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<InteractionEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, actor_user_id, target_user_id, event_type, occurred_at,
                   value, content_id, session_id, metadata
            FROM interaction_events
            WHERE ($1::bigint IS NULL OR actor_user_id = $1)
              AND ($2::bigint IS NULL OR target_user_id = $2)
              AND ($3::bigint IS NULL OR content_id = $3)
              AND ($4::timestamptz IS NULL OR occurred_at >= $4)
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(filter.actor_id)
        .bind(filter.target_id)
        .bind(filter.content_id)
        .bind(filter.occurred_after)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(EventRow::into_event).collect())
    }

    async fn daily_pair_counts(&self, cutoff: DateTime<Utc>) -> Result<Vec<DailyPairCount>> {
        let rows = sqlx::query_as::<_, DailyPairRow>(
            r#"
            SELECT actor_user_id, target_user_id,
                   DATE(occurred_at) AS day, event_type,
                   COUNT(*) AS count, MAX(occurred_at) AS last_occurred_at
            FROM interaction_events
            WHERE occurred_at >= $1
            GROUP BY actor_user_id, target_user_id, DATE(occurred_at), event_type
            ORDER BY actor_user_id, target_user_id, day
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                Some(DailyPairCount {
                    actor_user_id: r.actor_user_id,
                    target_user_id: r.target_user_id,
                    day: r.day,
                    event_type: EventType::parse(&r.event_type)?,
                    count: r.count,
                    last_occurred_at: r.last_occurred_at,
                })
            })
            .collect())
    }

    async fn daily_post_counts(&self, cutoff: DateTime<Utc>) -> Result<Vec<DailyPostCount>> {
        let rows = sqlx::query_as::<_, DailyPostRow>(
            r#"
            SELECT actor_user_id, content_id AS post_id,
                   DATE(occurred_at) AS day, event_type,
                   COUNT(*) AS count, MAX(occurred_at) AS last_occurred_at
            FROM interaction_events
            WHERE occurred_at >= $1 AND content_id IS NOT NULL
            GROUP BY actor_user_id, content_id, DATE(occurred_at), event_type
            ORDER BY actor_user_id, content_id, day
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                Some(DailyPostCount {
                    actor_user_id: r.actor_user_id,
                    post_id: r.post_id,
                    day: r.day,
                    event_type: EventType::parse(&r.event_type)?,
                    count: r.count,
                    last_occurred_at: r.last_occurred_at,
                })
            })
            .collect())
    }

    async fn distinct_targets(&self, user_id: i64, cutoff: DateTime<Utc>) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT target_user_id
            FROM interaction_events
            WHERE actor_user_id = $1 AND occurred_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn shared_target_counts(
        &self,
        user_id: i64,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(i64, i64)>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT e.actor_user_id, COUNT(DISTINCT e.target_user_id) AS shared_targets
            FROM interaction_events e
            WHERE e.occurred_at >= $2
              AND e.actor_user_id <> $1
              AND e.target_user_id IN (
                  SELECT DISTINCT target_user_id
                  FROM interaction_events
                  WHERE actor_user_id = $1 AND occurred_at >= $2
              )
            GROUP BY e.actor_user_id
            ORDER BY shared_targets DESC, e.actor_user_id ASC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn neighbor_target_counts(
        &self,
        neighbor_ids: &[i64],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<NeighborTargetCount>> {
        let rows = sqlx::query_as::<_, TypeCountRow>(
            r#"
            SELECT actor_user_id, target_user_id, event_type,
                   COUNT(*) AS count, MAX(occurred_at) AS last_occurred_at
            FROM interaction_events
            WHERE occurred_at >= $1 AND actor_user_id = ANY($2)
            GROUP BY actor_user_id, target_user_id, event_type
            "#,
        )
        .bind(cutoff)
        .bind(neighbor_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                Some(NeighborTargetCount {
                    actor_user_id: r.actor_user_id,
                    target_user_id: r.target_user_id,
                    event_type: EventType::parse(&r.event_type)?,
                    count: r.count,
                    last_occurred_at: r.last_occurred_at,
                })
            })
            .collect())
    }

    async fn incoming_target_counts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TargetTypeCount>> {
        let rows = sqlx::query_as::<_, TargetTypeRow>(
            r#"
            SELECT target_user_id, event_type,
                   COUNT(*) AS count, MAX(occurred_at) AS last_occurred_at
            FROM interaction_events
            WHERE occurred_at >= $1
            GROUP BY target_user_id, event_type
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                Some(TargetTypeCount {
                    target_user_id: r.target_user_id,
                    event_type: EventType::parse(&r.event_type)?,
                    count: r.count,
                    last_occurred_at: r.last_occurred_at,
                })
            })
            .collect())
    }

    async fn actor_activity(&self, cutoff: DateTime<Utc>) -> Result<Vec<ActorActivity>> {
        let summaries = sqlx::query_as::<_, ActivitySummaryRow>(
            r#"
            SELECT actor_user_id,
                   COUNT(*) AS total_interactions,
                   COUNT(DISTINCT content_id) AS unique_posts,
                   COUNT(DISTINCT target_user_id) AS unique_users,
                   MAX(occurred_at) AS last_active_at
            FROM interaction_events
            WHERE occurred_at >= $1
            GROUP BY actor_user_id
            ORDER BY actor_user_id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let type_rows = sqlx::query_as::<_, ActivityTypeRow>(
            r#"
            SELECT actor_user_id, event_type, COUNT(*) AS count
            FROM interaction_events
            WHERE occurred_at >= $1
            GROUP BY actor_user_id, event_type
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut by_actor: HashMap<i64, Vec<(EventType, i64)>> = HashMap::new();
        for r in type_rows {
            if let Some(event_type) = EventType::parse(&r.event_type) {
                by_actor
                    .entry(r.actor_user_id)
                    .or_default()
                    .push((event_type, r.count));
            }
        }

        Ok(summaries
            .into_iter()
            .map(|r| {
                let mut event_type_counts =
                    by_actor.remove(&r.actor_user_id).unwrap_or_default();
                event_type_counts.sort_by_key(|(et, _)| et.as_str());
                ActorActivity {
                    user_id: r.actor_user_id,
                    total_interactions: r.total_interactions,
                    event_type_counts,
                    unique_posts: r.unique_posts,
                    unique_users: r.unique_users,
                    last_active_at: r.last_active_at,
                }
            })
            .collect())
    }

    async fn recent_posts_by_authors(
        &self,
        author_ids: &[i64],
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PostActivity>> {
        let rows: Vec<(i64, i64, DateTime<Utc>, i64)> = sqlx::query_as(
            r#"
            SELECT p.id, p.user_id, p.created_at, COUNT(upe.post_id) AS engagement_count
            FROM posts p
            LEFT JOIN user_post_engagement upe ON upe.post_id = p.id
            WHERE p.user_id = ANY($1) AND p.created_at >= $2
            GROUP BY p.id, p.user_id, p.created_at
            ORDER BY p.created_at DESC, p.id ASC
            LIMIT $3
            "#,
        )
        .bind(author_ids)
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(post_id, author_id, created_at, engagement_count)| PostActivity {
                post_id,
                author_id,
                created_at,
                engagement_count,
            })
            .collect())
    }

    async fn seen_post_ids(&self, user_id: i64, cutoff: DateTime<Utc>) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT content_id
            FROM interaction_events
            WHERE actor_user_id = $1 AND content_id IS NOT NULL AND occurred_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn engaged_post_authors(
        &self,
        user_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(i64, i64)>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT DISTINCT e.content_id, p.user_id
            FROM interaction_events e
            JOIN posts p ON p.id = e.content_id
            WHERE e.actor_user_id = $1 AND e.content_id IS NOT NULL AND e.occurred_at >= $2
            ORDER BY e.content_id
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn engagements_by_users(
        &self,
        user_ids: &[i64],
        limit: usize,
    ) -> Result<Vec<UserEngagementRow>> {
        let rows: Vec<(i64, i64, f64)> = sqlx::query_as(
            r#"
            SELECT user_id, post_id, engagement_score
            FROM user_post_engagement
            WHERE user_id = ANY($1)
            ORDER BY engagement_score DESC, post_id ASC
            LIMIT $2
            "#,
        )
        .bind(user_ids)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, post_id, engagement_score)| UserEngagementRow {
                user_id,
                post_id,
                engagement_score,
            })
            .collect())
    }

    async fn trending_aggregates(
        &self,
        cutoff: DateTime<Utc>,
        min_total: f64,
        limit: usize,
    ) -> Result<Vec<TrendingAggregate>> {
        let rows: Vec<(i64, f64, i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT post_id,
                   SUM(engagement_score) AS total_engagement,
                   COUNT(DISTINCT user_id) AS distinct_engagers,
                   MAX(last_interaction_at) AS last_interaction_at
            FROM user_post_engagement
            WHERE last_interaction_at >= $1
            GROUP BY post_id
            HAVING SUM(engagement_score) >= $2
            ORDER BY total_engagement DESC, post_id ASC
            LIMIT $3
            "#,
        )
        .bind(cutoff)
        .bind(min_total)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(post_id, total_engagement, distinct_engagers, last_interaction_at)| {
                    TrendingAggregate {
                        post_id,
                        total_engagement,
                        distinct_engagers,
                        last_interaction_at,
                    }
                },
            )
            .collect())
    }

    async fn exploration_pool(
        &self,
        cutoff: DateTime<Utc>,
        min_avg_engagement: f64,
        limit: usize,
    ) -> Result<Vec<(i64, f64)>> {
        let rows: Vec<(i64, f64)> = sqlx::query_as(
            r#"
            SELECT post_id, AVG(engagement_score) AS avg_engagement
            FROM user_post_engagement
            WHERE last_interaction_at >= $1
            GROUP BY post_id
            HAVING AVG(engagement_score) >= $2
            ORDER BY post_id ASC
            LIMIT $3
            "#,
        )
        .bind(cutoff)
        .bind(min_avg_engagement)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn upsert_pair_scores(&self, rows: &[PairScore]) -> Result<u64> {
        let mut updated = 0u64;
        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO pair_score_cache (actor_user_id, target_user_id, score, updated_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (actor_user_id, target_user_id) DO UPDATE
                SET score = EXCLUDED.score, updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(row.actor_user_id)
            .bind(row.target_user_id)
            .bind(row.score)
            .execute(&self.pool)
            .await?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    async fn upsert_post_engagement(&self, rows: &[PostEngagement]) -> Result<u64> {
        let mut updated = 0u64;
        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO user_post_engagement
                    (user_id, post_id, engagement_score, interaction_count,
                     last_interaction_at, event_breakdown, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                ON CONFLICT (user_id, post_id) DO UPDATE
                SET engagement_score = EXCLUDED.engagement_score,
                    interaction_count = EXCLUDED.interaction_count,
                    last_interaction_at = EXCLUDED.last_interaction_at,
                    event_breakdown = EXCLUDED.event_breakdown,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(row.user_id)
            .bind(row.post_id)
            .bind(row.engagement_score)
            .bind(row.interaction_count)
            .bind(row.last_interaction_at)
            .bind(&row.event_breakdown)
            .execute(&self.pool)
            .await?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    async fn upsert_profile_features(&self, rows: &[UserProfileFeatures]) -> Result<u64> {
        let mut updated = 0u64;
        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO user_profile_features
                    (user_id, total_interactions, event_type_counts,
                     unique_posts, unique_users, last_active_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                ON CONFLICT (user_id) DO UPDATE
                SET total_interactions = EXCLUDED.total_interactions,
                    event_type_counts = EXCLUDED.event_type_counts,
                    unique_posts = EXCLUDED.unique_posts,
                    unique_users = EXCLUDED.unique_users,
                    last_active_at = EXCLUDED.last_active_at,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(row.user_id)
            .bind(row.total_interactions)
            .bind(&row.event_type_counts)
            .bind(row.unique_posts)
            .bind(row.unique_users)
            .bind(row.last_active_at)
            .execute(&self.pool)
            .await?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    async fn upsert_user_neighbors(&self, rows: &[UserNeighbor]) -> Result<u64> {
        let mut updated = 0u64;
        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO user_neighbors (user_id, neighbor_id, similarity, updated_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (user_id, neighbor_id) DO UPDATE
                SET similarity = EXCLUDED.similarity, updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(row.user_id)
            .bind(row.neighbor_id)
            .bind(row.similarity)
            .execute(&self.pool)
            .await?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    async fn read_post_engagement(&self, user_id: i64) -> Result<Vec<PostEngagement>> {
        let rows: Vec<(i64, i64, f64, i64, DateTime<Utc>, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT user_id, post_id, engagement_score, interaction_count,
                   last_interaction_at, event_breakdown
            FROM user_post_engagement
            WHERE user_id = $1
            ORDER BY post_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(user_id, post_id, engagement_score, interaction_count, last, breakdown)| {
                    PostEngagement {
                        user_id,
                        post_id,
                        engagement_score,
                        interaction_count,
                        last_interaction_at: last,
                        event_breakdown: breakdown,
                    }
                },
            )
            .collect())
    }

    async fn read_profile_features(&self, user_id: i64) -> Result<Option<UserProfileFeatures>> {
        let row: Option<(i64, i64, serde_json::Value, i64, i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT user_id, total_interactions, event_type_counts,
                   unique_posts, unique_users, last_active_at
            FROM user_profile_features
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(user_id, total_interactions, event_type_counts, unique_posts, unique_users, last)| {
                UserProfileFeatures {
                    user_id,
                    total_interactions,
                    event_type_counts,
                    unique_posts,
                    unique_users,
                    last_active_at: last,
                }
            },
        ))
    }

    async fn read_user_neighbors(&self, user_id: i64, k: usize) -> Result<Vec<UserNeighbor>> {
        let rows: Vec<(i64, i64, f64)> = sqlx::query_as(
            r#"
            SELECT user_id, neighbor_id, similarity
            FROM user_neighbors
            WHERE user_id = $1
            ORDER BY similarity DESC, neighbor_id ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, neighbor_id, similarity)| UserNeighbor {
                user_id,
                neighbor_id,
                similarity,
            })
            .collect())
    }
}
