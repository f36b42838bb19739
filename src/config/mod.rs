use std::env;

use serde::Deserialize;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Tunables for the offline aggregation pipeline. Every knob has a default
/// so a bare environment still produces a working process.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Lookback window for event aggregation, in days.
    pub window_days: i64,
    /// Half-life of the time decay applied to pair scores, in days.
    pub half_life_days: f64,
    /// Entries kept per actor row before the similarity pass.
    pub topk_per_actor: usize,
    /// Neighbors kept per user after the similarity pass.
    pub neighbor_k: usize,
    /// Optional fixed seed for the exploration source. Unset means entropy.
    pub exploration_seed: Option<u64>,
    /// Exit after one refresh pass instead of looping.
    pub run_once: bool,
    /// Interval between refresh passes when looping.
    pub interval_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL must be set".to_string()))?;

        Ok(Config {
            service: ServiceConfig {
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "affinity-service".to_string()),
            },
            database: DatabaseConfig {
                url,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            },
            pipeline: PipelineConfig {
                window_days: env_or("PIPELINE_WINDOW_DAYS", 30),
                half_life_days: env_or("PIPELINE_HALF_LIFE_DAYS", 7.0),
                topk_per_actor: env_or("PIPELINE_TOPK_PER_ACTOR", 200),
                neighbor_k: env_or("PIPELINE_NEIGHBOR_K", 50),
                exploration_seed: env::var("EXPLORATION_SEED")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                run_once: env_or("PIPELINE_RUN_ONCE", true),
                interval_secs: env_or("PIPELINE_INTERVAL_SECS", 3600),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back() {
        assert_eq!(env_or("AFFINITY_NO_SUCH_VAR", 42i64), 42);
    }
}
