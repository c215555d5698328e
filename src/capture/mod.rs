pub mod buffer;
pub mod controller;
mod loop_worker;
pub mod source;

pub use buffer::{SampleBuffer, SampleSink};
pub use controller::{CaptureConfig, CaptureController};
pub use source::{ReplaySource, SensorSource};
