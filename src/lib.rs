pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::{BlendConfig, BlendLayer, CandidateRequest, Recommender, ScoringParams};
pub use store::{EventStore, MemoryEventStore, PgEventStore};
