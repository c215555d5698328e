pub mod raw_sample;
pub mod sensor_chunk;
pub mod session;

pub use raw_sample::{RawSample, SampleValues, SensorKind};
pub use sensor_chunk::{AudioReading, AudioSummary, AxisSummary, LightSummary, SensorChunk};
pub use session::{SessionMetrics, SleepSession, StageHours, StageSource};
