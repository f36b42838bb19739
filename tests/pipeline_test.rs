//! End-to-end pipeline tests over the in-memory store: user
//! recommendations, the popularity fallback and the blended post feed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use affinity_service::models::{
    BlendStrategy, EventType, InteractionEvent, PostEngagement, Source, UserNeighbor,
};
use affinity_service::services::candidates::BlendConfig;
use affinity_service::{EventStore, MemoryEventStore, Recommender, ScoringParams};

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

fn engagement(user_id: i64, post_id: i64, score: f64, at: DateTime<Utc>) -> PostEngagement {
    PostEngagement {
        user_id,
        post_id,
        engagement_score: score,
        interaction_count: 1,
        last_interaction_at: at,
        event_breakdown: serde_json::Value::Null,
    }
}

fn recommender(store: Arc<MemoryEventStore>) -> Recommender {
    Recommender::new(store, ScoringParams::default(), BlendConfig::default())
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn two_hop_recommendations_exclude_engaged_targets() {
    let store = Arc::new(MemoryEventStore::new());
    let t = t0();
    // User 1 and user 3 both engage user 2, making 3 a neighbor of 1.
    // User 3 also messages user 4, which 1 has never touched.
    store.push_event(event(1, 2, EventType::Like, t, None));
    store.push_event(event(3, 2, EventType::Like, t, None));
    store.push_event(event(3, 4, EventType::Message, t, None));

    let rec = recommender(store.clone());
    let now = t + Duration::days(1);
    let recs = rec.recommend_users(1, 10, 30, 10, now).await.unwrap();

    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].user_id, 4);
    assert_eq!(recs[0].reason, "neighbors_2hop_weighted");
    // weight 1 (one shared target) * message score * one day of decay
    let expected = 2.0 * 2.0_f64.ln() * 2.0_f64.powf(-1.0 / 30.0);
    assert!((recs[0].score - expected).abs() < 1e-9);

    // The engaged target and the requester never appear.
    assert!(!recs.iter().any(|r| r.user_id == 1 || r.user_id == 2));
}

#[tokio::test]
async fn popularity_fallback_when_no_neighbors() {
    let store = Arc::new(MemoryEventStore::new());
    let t = t0();
    // User 1 is isolated; users 5..8 pile engagement onto user 9, a bit
    // onto user 10.
    store.push_event(event(5, 9, EventType::Like, t, None));
    store.push_event(event(6, 9, EventType::Share, t, None));
    store.push_event(event(7, 9, EventType::Comment, t, None));
    store.push_event(event(8, 10, EventType::View, t, None));

    let rec = recommender(store.clone());
    let now = t + Duration::days(1);

    let direct = rec.recommend_users(1, 10, 30, 10, now).await.unwrap();
    assert!(direct.is_empty());

    let exclude: HashSet<i64> = [1].into_iter().collect();
    let popular = rec.popular_users(&exclude, 10, 30, now).await.unwrap();
    assert_eq!(popular[0].user_id, 9);
    assert!(popular.iter().all(|r| r.reason == "popular"));
    assert!(popular.iter().all(|r| r.user_id != 1));
    // Ranked by decayed incoming engagement, strictly ordered here.
    assert!(popular[0].score > popular[1].score);
}

#[tokio::test]
async fn cf_only_scores_neighbor_engagement_by_shared_weight() {
    let store = Arc::new(MemoryEventStore::new());
    let t = t0();
    // User 1 and user 3 share two targets, so neighbor weight is 2.
    store.push_event(event(1, 10, EventType::Like, t, None));
    store.push_event(event(1, 11, EventType::Like, t, None));
    store.push_event(event(3, 10, EventType::Like, t, None));
    store.push_event(event(3, 11, EventType::Like, t, None));
    // Neighbor 3 engaged post 500 with score 2.0.
    store.set_engagement(engagement(3, 500, 2.0, t));

    let rec = recommender(store.clone());
    let now = t + Duration::days(1);
    let (candidates, stats) = rec
        .post_candidates(1, 10, 30, BlendStrategy::CfOnly, now)
        .await
        .unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].post_id, 500);
    assert_eq!(candidates[0].source, Source::Cf);
    assert_eq!(candidates[0].reason, "collaborative_filtering");
    // engagement 2.0 * shared-target weight 2.0
    assert!((candidates[0].score - 4.0).abs() < 1e-9);
    assert_eq!(stats.cf_count, 1);
    assert_eq!(stats.social_count, 0);
}

#[tokio::test]
async fn cf_weighs_engagement_by_persisted_neighbor_similarity() {
    let store = Arc::new(MemoryEventStore::new());
    let t = t0();
    // The batch job has produced a cosine neighbor with similarity 0.8,
    // who engaged post 700 with score 5.0.
    store
        .upsert_user_neighbors(&[UserNeighbor {
            user_id: 1,
            neighbor_id: 3,
            similarity: 0.8,
        }])
        .await
        .unwrap();
    store.set_engagement(engagement(3, 700, 5.0, t));

    let rec = recommender(store.clone());
    let now = t + Duration::days(1);
    let (candidates, _) = rec
        .post_candidates(1, 10, 30, BlendStrategy::CfOnly, now)
        .await
        .unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].post_id, 700);
    assert_eq!(candidates[0].source, Source::Cf);
    assert!((candidates[0].score - 4.0).abs() < 1e-9);
}

#[tokio::test]
async fn cf_excludes_posts_the_user_has_seen() {
    let store = Arc::new(MemoryEventStore::new());
    let t = t0();
    store.push_event(event(1, 10, EventType::Like, t, None));
    store.push_event(event(3, 10, EventType::Like, t, None));
    // User 1 already viewed post 500.
    store.push_event(event(1, 10, EventType::View, t, Some(500)));
    store.set_engagement(engagement(3, 500, 2.0, t));
    store.set_engagement(engagement(3, 501, 1.0, t));

    let rec = recommender(store.clone());
    let now = t + Duration::days(1);
    let (candidates, _) = rec
        .post_candidates(1, 10, 30, BlendStrategy::CfOnly, now)
        .await
        .unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].post_id, 501);
}

#[tokio::test]
async fn multi_source_blend_deduplicates_and_respects_limit() {
    let store = Arc::new(MemoryEventStore::new());
    let t = t0();
    // Social edge: 1 follows 2, who authored two fresh posts.
    store.push_event(event(1, 2, EventType::Like, t, None));
    store.add_post(100, 2, t);
    store.add_post(101, 2, t - Duration::days(1));
    // Neighbor 3 shares target 2 and engages posts that also trend.
    store.push_event(event(3, 2, EventType::Like, t, None));
    store.set_engagement(engagement(3, 100, 3.0, t));
    store.set_engagement(engagement(3, 200, 5.0, t));
    store.set_engagement(engagement(4, 200, 4.0, t));

    let rec = recommender(store.clone());
    let now = t + Duration::days(1);
    let (candidates, stats) = rec
        .post_candidates(1, 10, 30, BlendStrategy::MultiSource, now)
        .await
        .unwrap();

    assert!(!candidates.is_empty());
    assert!(candidates.len() <= 10);
    assert_eq!(stats.final_count, candidates.len());

    // No post appears twice, even though CF and trending overlap on 200.
    let ids: HashSet<i64> = candidates.iter().map(|c| c.post_id).collect();
    assert_eq!(ids.len(), candidates.len());

    // Output is sorted by score descending.
    for pair in candidates.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn exploration_sample_is_reproducible_with_fixed_seed() {
    let t = t0();
    let seed_store = || {
        let store = Arc::new(MemoryEventStore::new());
        for post_id in 0..20 {
            store.set_engagement(engagement(50 + post_id, 1000 + post_id, 1.0, t));
        }
        store
    };

    let config = BlendConfig {
        social_share: 0.0,
        cf_share: 0.0,
        trending_share: 0.0,
        content_based_share: 0.0,
        exploration_share: 1.0,
        exploration_seed: Some(42),
        ..BlendConfig::default()
    };

    let now = t + Duration::days(1);
    let mut runs = Vec::new();
    for _ in 0..2 {
        let rec = Recommender::new(seed_store(), ScoringParams::default(), config.clone());
        let (candidates, _) = rec
            .post_candidates(1, 5, 30, BlendStrategy::MultiSource, now)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 5);
        assert!(candidates.iter().all(|c| c.source == Source::Exploration));
        // avg engagement 1.0 discounted by half
        assert!(candidates.iter().all(|c| (c.score - 0.5).abs() < 1e-9));
        runs.push(candidates.iter().map(|c| c.post_id).collect::<Vec<_>>());
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn empty_window_yields_empty_results() {
    let store = Arc::new(MemoryEventStore::new());
    let rec = recommender(store.clone());
    let now = t0();

    let recs = rec.recommend_users(1, 10, 30, 10, now).await.unwrap();
    assert!(recs.is_empty());

    let similar = rec.similar_users(1, 10, 30, now).await.unwrap();
    assert!(similar.is_empty());

    let (candidates, stats) = rec
        .post_candidates(1, 10, 30, BlendStrategy::MultiSource, now)
        .await
        .unwrap();
    assert!(candidates.is_empty());
    assert_eq!(stats.final_count, 0);
}

#[tokio::test]
async fn similar_users_ranked_by_shared_targets() {
    let store = Arc::new(MemoryEventStore::new());
    let t = t0();
    // User 5 shares two targets with 1, user 6 shares one.
    store.push_event(event(1, 10, EventType::Like, t, None));
    store.push_event(event(1, 11, EventType::Like, t, None));
    store.push_event(event(5, 10, EventType::Like, t, None));
    store.push_event(event(5, 11, EventType::Like, t, None));
    store.push_event(event(6, 10, EventType::Like, t, None));

    let rec = recommender(store.clone());
    let now = t + Duration::days(1);
    let similar = rec.similar_users(1, 10, 30, now).await.unwrap();

    assert_eq!(similar.len(), 2);
    assert_eq!(similar[0].user_id, 5);
    assert_eq!(similar[0].score, 2.0);
    assert_eq!(similar[1].user_id, 6);
    assert!(similar.iter().all(|s| s.reason == "shared_targets"));
}
