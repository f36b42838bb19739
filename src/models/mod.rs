use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Interaction event types, ordered roughly by implicit-feedback strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Like,
    Comment,
    Share,
    Message,
    View,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Like => "like",
            EventType::Comment => "comment",
            EventType::Share => "share",
            EventType::Message => "message",
            EventType::View => "view",
        }
    }

    /// Case-insensitive parse. Unknown types return `None` and score zero
    /// downstream; ingestion validation upstream should have rejected them.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "like" => Some(EventType::Like),
            "comment" => Some(EventType::Comment),
            "share" => Some(EventType::Share),
            "message" => Some(EventType::Message),
            "view" => Some(EventType::View),
            _ => None,
        }
    }

    pub const ALL: [EventType; 5] = [
        EventType::Like,
        EventType::Comment,
        EventType::Share,
        EventType::Message,
        EventType::View,
    ];
}

/// A single append-only interaction event. Never mutated by this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: Uuid,
    pub actor_user_id: i64,
    pub target_user_id: i64,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub value: Option<f64>,
    pub content_id: Option<i64>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Decayed, weighted score for one (actor, target) pair.
///
/// Invariant: pairs surviving aggregation have score > 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
    pub actor_user_id: i64,
    pub target_user_id: i64,
    pub score: f64,
}

/// One entry of a user's precomputed neighbor list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserNeighbor {
    pub user_id: i64,
    pub neighbor_id: i64,
    pub similarity: f64,
}

/// A scored user recommendation. The `reason` tag is part of the contract:
/// "shared_targets", "neighbors_2hop_weighted" or "popular".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserScore {
    pub user_id: i64,
    pub score: f64,
    pub reason: &'static str,
}

/// Candidate source for post recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Social,
    Cf,
    Trending,
    ContentBased,
    Exploration,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Social => "social",
            Source::Cf => "cf",
            Source::Trending => "trending",
            Source::ContentBased => "content_based",
            Source::Exploration => "exploration",
        }
    }
}

/// A scored feed candidate produced per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCandidate {
    pub post_id: i64,
    pub score: f64,
    pub source: Source,
    pub reason: &'static str,
}

/// Blending strategy for the post candidate engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendStrategy {
    MultiSource,
    SocialOnly,
    CfOnly,
    TrendingOnly,
}

impl BlendStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "multi_source" => Some(BlendStrategy::MultiSource),
            "social_only" => Some(BlendStrategy::SocialOnly),
            "cf_only" => Some(BlendStrategy::CfOnly),
            "trending_only" => Some(BlendStrategy::TrendingOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlendStrategy::MultiSource => "multi_source",
            BlendStrategy::SocialOnly => "social_only",
            BlendStrategy::CfOnly => "cf_only",
            BlendStrategy::TrendingOnly => "trending_only",
        }
    }
}

/// Materialized (user, post) engagement aggregate, upserted by the refresh
/// job and read as a signal by the post candidate engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostEngagement {
    pub user_id: i64,
    pub post_id: i64,
    pub engagement_score: f64,
    pub interaction_count: i64,
    pub last_interaction_at: DateTime<Utc>,
    /// event type -> raw count within the window
    pub event_breakdown: serde_json::Value,
}

/// Per-user descriptive activity summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfileFeatures {
    pub user_id: i64,
    pub total_interactions: i64,
    /// event type -> count distribution
    pub event_type_counts: serde_json::Value,
    pub unique_posts: i64,
    pub unique_users: i64,
    pub last_active_at: DateTime<Utc>,
}

/// Per-source candidate counts for one blend invocation.
#[derive(Debug, Clone, Default)]
pub struct BlendStats {
    pub social_count: usize,
    pub cf_count: usize,
    pub trending_count: usize,
    pub content_based_count: usize,
    pub exploration_count: usize,
    pub final_count: usize,
}

impl BlendStats {
    pub fn record(&mut self, source: Source, count: usize) {
        match source {
            Source::Social => self.social_count = count,
            Source::Cf => self.cf_count = count,
            Source::Trending => self.trending_count = count,
            Source::ContentBased => self.content_based_count = count,
            Source::Exploration => self.exploration_count = count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parse() {
        assert_eq!(EventType::parse("like"), Some(EventType::Like));
        assert_eq!(EventType::parse(" SHARE "), Some(EventType::Share));
        assert_eq!(EventType::parse("bookmark"), None);
    }

    #[test]
    fn test_source_tags() {
        assert_eq!(Source::Cf.as_str(), "cf");
        assert_eq!(Source::ContentBased.as_str(), "content_based");
    }

    #[test]
    fn test_blend_strategy_parse() {
        assert_eq!(
            BlendStrategy::parse("multi_source"),
            Some(BlendStrategy::MultiSource)
        );
        assert_eq!(BlendStrategy::parse("everything"), None);
    }
}
