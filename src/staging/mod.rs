pub mod classifier;
pub mod config;
pub mod features;
pub mod timeline;

pub use classifier::{classify, SleepStage};
pub use config::ClassifierConfig;
pub use features::{
    analyze_audio, eye_movement_present, movement_intensity, AudioAnalysis, MovementIntensity,
    MovementLevel,
};
pub use timeline::{build_stage_timeline, StagePoint};
