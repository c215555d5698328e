pub mod aggregator;
pub mod config;

pub use aggregator::{ChunkAggregator, ChunkRun};
pub use config::ChunkingConfig;
