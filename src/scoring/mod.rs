pub mod aggregate;
pub mod config;
pub mod evaluator;
pub mod score;

pub use aggregate::{aggregate_stages, estimated_breakdown, StageBreakdown};
pub use config::ScoringConfig;
pub use evaluator::SessionEvaluator;
pub use score::{compute_sleep_score, ScoreInputs};
