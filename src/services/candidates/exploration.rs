use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{CandidateRequest, CandidateStrategy};
use crate::error::Result;
use crate::models::{PostCandidate, Source};
use crate::store::EventStore;

/// Exploration source: a uniform random sample from posts whose average
/// engagement clears a low quality floor. The score is the average
/// engagement discounted by half so exploration never outranks the
/// substantive sources.
///
/// The RNG is injected via an optional seed so tests can pin the sample.
pub struct ExplorationStrategy {
    short_window_days: i64,
    min_avg_engagement: f64,
    rng: Mutex<StdRng>,
}

const EXPLORATION_DISCOUNT: f64 = 0.5;

impl ExplorationStrategy {
    pub fn new(short_window_days: i64, min_avg_engagement: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            short_window_days,
            min_avg_engagement,
            rng: Mutex::new(rng),
        }
    }
}

#[async_trait]
impl CandidateStrategy for ExplorationStrategy {
    async fn candidates(
        &self,
        store: &dyn EventStore,
        request: &CandidateRequest,
        exclude: &HashSet<i64>,
    ) -> Result<Vec<PostCandidate>> {
        let cutoff = request.short_cutoff(self.short_window_days);

        // Over-fetch the qualifying pool, then sample locally.
        let pool = store
            .exploration_pool(cutoff, self.min_avg_engagement, request.limit * 3)
            .await?;

        let mut eligible: Vec<(i64, f64)> = pool
            .into_iter()
            .filter(|(post_id, _)| !exclude.contains(post_id))
            .collect();

        {
            let mut rng = self.rng.lock().expect("exploration rng poisoned");
            eligible.shuffle(&mut *rng);
        }
        eligible.truncate(request.limit);

        Ok(eligible
            .into_iter()
            .map(|(post_id, avg_engagement)| PostCandidate {
                post_id,
                score: avg_engagement * EXPLORATION_DISCOUNT,
                source: Source::Exploration,
                reason: "exploration",
            })
            .collect())
    }

    fn source(&self) -> Source {
        Source::Exploration
    }
}
