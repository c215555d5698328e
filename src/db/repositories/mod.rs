pub mod chunks;
pub mod raw_samples;
pub mod sessions;

pub use raw_samples::{BacklogRow, BatchOutcome, BatchPlan, KindBacklog};
