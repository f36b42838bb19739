//! In-process `EventStore` used by tests and local development.
//!
//! Computes the same grouped aggregates as the Postgres implementation, so
//! the pipeline can be exercised deterministically without a database.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    ActorActivity, DailyPairCount, DailyPostCount, EventFilter, EventStore, NeighborTargetCount,
    PostActivity, TargetTypeCount, TrendingAggregate, UserEngagementRow,
};
use crate::error::Result;
use crate::models::{
    EventType, InteractionEvent, PairScore, PostEngagement, UserNeighbor, UserProfileFeatures,
};

/// Minimal post record for the post-side reads.
#[derive(Debug, Clone)]
pub struct SeedPost {
    pub post_id: i64,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    events: Vec<InteractionEvent>,
    posts: HashMap<i64, SeedPost>,
    pair_scores: HashMap<(i64, i64), PairScore>,
    engagement: HashMap<(i64, i64), PostEngagement>,
    profiles: HashMap<i64, UserProfileFeatures>,
    neighbors: HashMap<i64, Vec<UserNeighbor>>,
}

#[derive(Default)]
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, event: InteractionEvent) {
        self.inner.write().expect("store lock poisoned").events.push(event);
    }

    pub fn add_post(&self, post_id: i64, author_id: i64, created_at: DateTime<Utc>) {
        self.inner
            .write()
            .expect("store lock poisoned")
            .posts
            .insert(
                post_id,
                SeedPost {
                    post_id,
                    author_id,
                    created_at,
                },
            );
    }

    pub fn set_engagement(&self, row: PostEngagement) {
        self.inner
            .write()
            .expect("store lock poisoned")
            .engagement
            .insert((row.user_id, row.post_id), row);
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<InteractionEvent>> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .events
            .iter()
            .filter(|e| {
                filter.actor_id.map_or(true, |id| e.actor_user_id == id)
                    && filter.target_id.map_or(true, |id| e.target_user_id == id)
                    && filter.content_id.map_or(true, |id| e.content_id == Some(id))
                    && filter.occurred_after.map_or(true, |t| e.occurred_at >= t)
            })
            .cloned()
            .collect())
    }

    async fn daily_pair_counts(&self, cutoff: DateTime<Utc>) -> Result<Vec<DailyPairCount>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut groups: HashMap<(i64, i64, chrono::NaiveDate, EventType), (i64, DateTime<Utc>)> =
            HashMap::new();
        for e in inner.events.iter().filter(|e| e.occurred_at >= cutoff) {
            let key = (
                e.actor_user_id,
                e.target_user_id,
                e.occurred_at.date_naive(),
                e.event_type,
            );
            let entry = groups.entry(key).or_insert((0, e.occurred_at));
            entry.0 += 1;
            if e.occurred_at > entry.1 {
                entry.1 = e.occurred_at;
            }
        }
        let mut rows: Vec<DailyPairCount> = groups
            .into_iter()
            .map(
                |((actor, target, day, event_type), (count, last))| DailyPairCount {
                    actor_user_id: actor,
                    target_user_id: target,
                    day,
                    event_type,
                    count,
                    last_occurred_at: last,
                },
            )
            .collect();
        rows.sort_by_key(|r| (r.actor_user_id, r.target_user_id, r.day));
        Ok(rows)
    }

    async fn daily_post_counts(&self, cutoff: DateTime<Utc>) -> Result<Vec<DailyPostCount>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut groups: HashMap<(i64, i64, chrono::NaiveDate, EventType), (i64, DateTime<Utc>)> =
            HashMap::new();
        for e in inner.events.iter().filter(|e| e.occurred_at >= cutoff) {
            let Some(post_id) = e.content_id else { continue };
            let key = (
                e.actor_user_id,
                post_id,
                e.occurred_at.date_naive(),
                e.event_type,
            );
            let entry = groups.entry(key).or_insert((0, e.occurred_at));
            entry.0 += 1;
            if e.occurred_at > entry.1 {
                entry.1 = e.occurred_at;
            }
        }
        let mut rows: Vec<DailyPostCount> = groups
            .into_iter()
            .map(
                |((actor, post_id, day, event_type), (count, last))| DailyPostCount {
                    actor_user_id: actor,
                    post_id,
                    day,
                    event_type,
                    count,
                    last_occurred_at: last,
                },
            )
            .collect();
        rows.sort_by_key(|r| (r.actor_user_id, r.post_id, r.day));
        Ok(rows)
    }

    async fn distinct_targets(&self, user_id: i64, cutoff: DateTime<Utc>) -> Result<HashSet<i64>> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .events
            .iter()
            .filter(|e| e.actor_user_id == user_id && e.occurred_at >= cutoff)
            .map(|e| e.target_user_id)
            .collect())
    }

    async fn shared_target_counts(
        &self,
        user_id: i64,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(i64, i64)>> {
        let user_targets = self.distinct_targets(user_id, cutoff).await?;
        if user_targets.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().expect("store lock poisoned");
        let mut shared: HashMap<i64, HashSet<i64>> = HashMap::new();
        for e in inner.events.iter().filter(|e| {
            e.occurred_at >= cutoff
                && e.actor_user_id != user_id
                && user_targets.contains(&e.target_user_id)
        }) {
            shared
                .entry(e.actor_user_id)
                .or_default()
                .insert(e.target_user_id);
        }
        let mut counts: Vec<(i64, i64)> = shared
            .into_iter()
            .map(|(other, targets)| (other, targets.len() as i64))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(limit);
        Ok(counts)
    }

    async fn neighbor_target_counts(
        &self,
        neighbor_ids: &[i64],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<NeighborTargetCount>> {
        let wanted: HashSet<i64> = neighbor_ids.iter().copied().collect();
        let inner = self.inner.read().expect("store lock poisoned");
        let mut groups: HashMap<(i64, i64, EventType), (i64, DateTime<Utc>)> = HashMap::new();
        for e in inner
            .events
            .iter()
            .filter(|e| e.occurred_at >= cutoff && wanted.contains(&e.actor_user_id))
        {
            let key = (e.actor_user_id, e.target_user_id, e.event_type);
            let entry = groups.entry(key).or_insert((0, e.occurred_at));
            entry.0 += 1;
            if e.occurred_at > entry.1 {
                entry.1 = e.occurred_at;
            }
        }
        let mut rows: Vec<NeighborTargetCount> = groups
            .into_iter()
            .map(
                |((actor, target, event_type), (count, last))| NeighborTargetCount {
                    actor_user_id: actor,
                    target_user_id: target,
                    event_type,
                    count,
                    last_occurred_at: last,
                },
            )
            .collect();
        rows.sort_by_key(|r| (r.actor_user_id, r.target_user_id));
        Ok(rows)
    }

    async fn incoming_target_counts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TargetTypeCount>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut groups: HashMap<(i64, EventType), (i64, DateTime<Utc>)> = HashMap::new();
        for e in inner.events.iter().filter(|e| e.occurred_at >= cutoff) {
            let key = (e.target_user_id, e.event_type);
            let entry = groups.entry(key).or_insert((0, e.occurred_at));
            entry.0 += 1;
            if e.occurred_at > entry.1 {
                entry.1 = e.occurred_at;
            }
        }
        let mut rows: Vec<TargetTypeCount> = groups
            .into_iter()
            .map(|((target, event_type), (count, last))| TargetTypeCount {
                target_user_id: target,
                event_type,
                count,
                last_occurred_at: last,
            })
            .collect();
        rows.sort_by_key(|r| r.target_user_id);
        Ok(rows)
    }

    async fn actor_activity(&self, cutoff: DateTime<Utc>) -> Result<Vec<ActorActivity>> {
        let inner = self.inner.read().expect("store lock poisoned");
        struct Acc {
            total: i64,
            by_type: HashMap<EventType, i64>,
            posts: HashSet<i64>,
            users: HashSet<i64>,
            last: DateTime<Utc>,
        }
        let mut accs: HashMap<i64, Acc> = HashMap::new();
        for e in inner.events.iter().filter(|e| e.occurred_at >= cutoff) {
            let acc = accs.entry(e.actor_user_id).or_insert_with(|| Acc {
                total: 0,
                by_type: HashMap::new(),
                posts: HashSet::new(),
                users: HashSet::new(),
                last: e.occurred_at,
            });
            acc.total += 1;
            *acc.by_type.entry(e.event_type).or_insert(0) += 1;
            if let Some(post_id) = e.content_id {
                acc.posts.insert(post_id);
            }
            acc.users.insert(e.target_user_id);
            if e.occurred_at > acc.last {
                acc.last = e.occurred_at;
            }
        }
        let mut rows: Vec<ActorActivity> = accs
            .into_iter()
            .map(|(user_id, acc)| {
                let mut event_type_counts: Vec<(EventType, i64)> =
                    acc.by_type.into_iter().collect();
                event_type_counts.sort_by_key(|(et, _)| et.as_str());
                ActorActivity {
                    user_id,
                    total_interactions: acc.total,
                    event_type_counts,
                    unique_posts: acc.posts.len() as i64,
                    unique_users: acc.users.len() as i64,
                    last_active_at: acc.last,
                }
            })
            .collect();
        rows.sort_by_key(|r| r.user_id);
        Ok(rows)
    }

    async fn recent_posts_by_authors(
        &self,
        author_ids: &[i64],
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PostActivity>> {
        let wanted: HashSet<i64> = author_ids.iter().copied().collect();
        let inner = self.inner.read().expect("store lock poisoned");
        let mut engagement_counts: HashMap<i64, i64> = HashMap::new();
        for (_, row) in inner.engagement.iter() {
            *engagement_counts.entry(row.post_id).or_insert(0) += 1;
        }
        let mut rows: Vec<PostActivity> = inner
            .posts
            .values()
            .filter(|p| wanted.contains(&p.author_id) && p.created_at >= cutoff)
            .map(|p| PostActivity {
                post_id: p.post_id,
                author_id: p.author_id,
                created_at: p.created_at,
                engagement_count: engagement_counts.get(&p.post_id).copied().unwrap_or(0),
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.post_id.cmp(&b.post_id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn seen_post_ids(&self, user_id: i64, cutoff: DateTime<Utc>) -> Result<HashSet<i64>> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .events
            .iter()
            .filter(|e| e.actor_user_id == user_id && e.occurred_at >= cutoff)
            .filter_map(|e| e.content_id)
            .collect())
    }

    async fn engaged_post_authors(
        &self,
        user_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(i64, i64)>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut pairs: HashSet<(i64, i64)> = HashSet::new();
        for e in inner
            .events
            .iter()
            .filter(|e| e.actor_user_id == user_id && e.occurred_at >= cutoff)
        {
            if let Some(post_id) = e.content_id {
                if let Some(post) = inner.posts.get(&post_id) {
                    pairs.insert((post_id, post.author_id));
                }
            }
        }
        let mut rows: Vec<(i64, i64)> = pairs.into_iter().collect();
        rows.sort_unstable();
        Ok(rows)
    }

    async fn engagements_by_users(
        &self,
        user_ids: &[i64],
        limit: usize,
    ) -> Result<Vec<UserEngagementRow>> {
        let wanted: HashSet<i64> = user_ids.iter().copied().collect();
        let inner = self.inner.read().expect("store lock poisoned");
        let mut rows: Vec<UserEngagementRow> = inner
            .engagement
            .values()
            .filter(|row| wanted.contains(&row.user_id))
            .map(|row| UserEngagementRow {
                user_id: row.user_id,
                post_id: row.post_id,
                engagement_score: row.engagement_score,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.engagement_score
                .partial_cmp(&a.engagement_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn trending_aggregates(
        &self,
        cutoff: DateTime<Utc>,
        min_total: f64,
        limit: usize,
    ) -> Result<Vec<TrendingAggregate>> {
        let inner = self.inner.read().expect("store lock poisoned");
        struct Acc {
            total: f64,
            users: HashSet<i64>,
            last: DateTime<Utc>,
        }
        let mut accs: HashMap<i64, Acc> = HashMap::new();
        for row in inner
            .engagement
            .values()
            .filter(|row| row.last_interaction_at >= cutoff)
        {
            let acc = accs.entry(row.post_id).or_insert_with(|| Acc {
                total: 0.0,
                users: HashSet::new(),
                last: row.last_interaction_at,
            });
            acc.total += row.engagement_score;
            acc.users.insert(row.user_id);
            if row.last_interaction_at > acc.last {
                acc.last = row.last_interaction_at;
            }
        }
        let mut rows: Vec<TrendingAggregate> = accs
            .into_iter()
            .filter(|(_, acc)| acc.total >= min_total)
            .map(|(post_id, acc)| TrendingAggregate {
                post_id,
                total_engagement: acc.total,
                distinct_engagers: acc.users.len() as i64,
                last_interaction_at: acc.last,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_engagement
                .partial_cmp(&a.total_engagement)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn exploration_pool(
        &self,
        cutoff: DateTime<Utc>,
        min_avg_engagement: f64,
        limit: usize,
    ) -> Result<Vec<(i64, f64)>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut sums: HashMap<i64, (f64, i64)> = HashMap::new();
        for row in inner
            .engagement
            .values()
            .filter(|row| row.last_interaction_at >= cutoff)
        {
            let entry = sums.entry(row.post_id).or_insert((0.0, 0));
            entry.0 += row.engagement_score;
            entry.1 += 1;
        }
        let mut rows: Vec<(i64, f64)> = sums
            .into_iter()
            .map(|(post_id, (total, count))| (post_id, total / count as f64))
            .filter(|(_, avg)| *avg >= min_avg_engagement)
            .collect();
        rows.sort_by_key(|(post_id, _)| *post_id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn upsert_pair_scores(&self, rows: &[PairScore]) -> Result<u64> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        for row in rows {
            inner
                .pair_scores
                .insert((row.actor_user_id, row.target_user_id), *row);
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_post_engagement(&self, rows: &[PostEngagement]) -> Result<u64> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        for row in rows {
            inner
                .engagement
                .insert((row.user_id, row.post_id), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_profile_features(&self, rows: &[UserProfileFeatures]) -> Result<u64> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        for row in rows {
            inner.profiles.insert(row.user_id, row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_user_neighbors(&self, rows: &[UserNeighbor]) -> Result<u64> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        for row in rows {
            let list = inner.neighbors.entry(row.user_id).or_default();
            match list.iter_mut().find(|n| n.neighbor_id == row.neighbor_id) {
                Some(existing) => existing.similarity = row.similarity,
                None => list.push(*row),
            }
        }
        for list in inner.neighbors.values_mut() {
            list.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.neighbor_id.cmp(&b.neighbor_id))
            });
        }
        Ok(rows.len() as u64)
    }

    async fn read_post_engagement(&self, user_id: i64) -> Result<Vec<PostEngagement>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut rows: Vec<PostEngagement> = inner
            .engagement
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.post_id);
        Ok(rows)
    }

    async fn read_profile_features(&self, user_id: i64) -> Result<Option<UserProfileFeatures>> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner.profiles.get(&user_id).cloned())
    }

    async fn read_user_neighbors(&self, user_id: i64, k: usize) -> Result<Vec<UserNeighbor>> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .neighbors
            .get(&user_id)
            .map(|list| list.iter().take(k).copied().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_query_events_filters_compose() {
        let store = MemoryEventStore::new();
        let t = t0();
        store.push_event(event(1, 2, EventType::Like, t, Some(100)));
        store.push_event(event(1, 3, EventType::View, t + chrono::Duration::days(1), None));
        store.push_event(event(4, 2, EventType::Share, t, None));

        let all = store.query_events(&EventFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let by_actor = store
            .query_events(&EventFilter {
                actor_id: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_actor.len(), 2);

        let narrow = store
            .query_events(&EventFilter {
                actor_id: Some(1),
                target_id: Some(2),
                content_id: Some(100),
                occurred_after: Some(t),
            })
            .await
            .unwrap();
        assert_eq!(narrow.len(), 1);
        assert_eq!(narrow[0].event_type, EventType::Like);
    }

    #[tokio::test]
    async fn test_shared_target_counts_ordering_and_limit() {
        let store = MemoryEventStore::new();
        let t = t0();
        store.push_event(event(1, 10, EventType::Like, t, None));
        store.push_event(event(1, 11, EventType::Like, t, None));
        // 5 shares two targets, 6 and 7 one each.
        store.push_event(event(5, 10, EventType::Like, t, None));
        store.push_event(event(5, 11, EventType::Like, t, None));
        store.push_event(event(6, 10, EventType::Like, t, None));
        store.push_event(event(7, 11, EventType::Like, t, None));

        let cutoff = t - chrono::Duration::days(1);
        let counts = store.shared_target_counts(1, cutoff, 2).await.unwrap();
        assert_eq!(counts, vec![(5, 2), (6, 1)]);
    }

    #[tokio::test]
    async fn test_trending_aggregates_apply_floor() {
        let store = MemoryEventStore::new();
        let t = t0();
        store.set_engagement(PostEngagement {
            user_id: 1,
            post_id: 100,
            engagement_score: 0.4,
            interaction_count: 1,
            last_interaction_at: t,
            event_breakdown: serde_json::Value::Null,
        });
        store.set_engagement(PostEngagement {
            user_id: 1,
            post_id: 200,
            engagement_score: 3.0,
            interaction_count: 1,
            last_interaction_at: t,
            event_breakdown: serde_json::Value::Null,
        });
        store.set_engagement(PostEngagement {
            user_id: 2,
            post_id: 200,
            engagement_score: 2.0,
            interaction_count: 1,
            last_interaction_at: t,
            event_breakdown: serde_json::Value::Null,
        });

        let cutoff = t - chrono::Duration::days(1);
        let rows = store.trending_aggregates(cutoff, 1.0, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].post_id, 200);
        assert!((rows[0].total_engagement - 5.0).abs() < 1e-12);
        assert_eq!(rows[0].distinct_engagers, 2);
    }
}
