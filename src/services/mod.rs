pub mod candidates;
pub mod evaluation;
pub mod matrix;
pub mod preprocess;
pub mod recommender;
pub mod scoring;

pub use candidates::{BlendConfig, BlendLayer, CandidateRequest, CandidateStrategy};
pub use recommender::Recommender;
pub use scoring::ScoringParams;
