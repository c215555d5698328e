mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{
    AudioReading, AudioSummary, AxisSummary, LightSummary, RawSample, SampleValues,
    SensorChunk, SensorKind, SessionMetrics, SleepSession, StageHours, StageSource,
};
pub use repositories::{BacklogRow, BatchOutcome, BatchPlan, KindBacklog};
#[cfg(test)]
pub(crate) use repositories::chunks::insert_chunk;
