use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, PoisonError,
};

use anyhow::{bail, Result};

use crate::capture::buffer::SampleSink;
use crate::db::{SampleValues, SensorKind};

/// One sensor channel. Platform integrations implement this; availability
/// is checked once when capture is set up, not on every call.
pub trait SensorSource: Send + Sync {
    fn kind(&self) -> SensorKind;

    fn is_available(&self) -> bool;

    /// Begin delivering readings into `sink`. Implementations may push from
    /// any thread.
    fn start(&self, sink: SampleSink) -> Result<()>;

    fn stop(&self) -> Result<()>;
}

/// Plays back previously recorded readings of one channel, e.g. a night
/// exported from another device.
pub struct ReplaySource {
    kind: SensorKind,
    readings: Mutex<Vec<(i64, SampleValues)>>,
    running: AtomicBool,
}

impl ReplaySource {
    pub fn new(kind: SensorKind, readings: Vec<(i64, SampleValues)>) -> Self {
        Self {
            kind,
            readings: Mutex::new(readings),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl SensorSource for ReplaySource {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        true
    }

    fn start(&self, sink: SampleSink) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("{} replay already running", self.kind);
        }

        let readings = std::mem::take(
            &mut *self
                .readings
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (timestamp_ms, values) in readings {
            match values {
                SampleValues::Motion { axes } => sink.motion(self.kind, timestamp_ms, axes),
                SampleValues::Audio {
                    decibel,
                    frequency_hz,
                } => sink.audio(timestamp_ms, decibel, frequency_hz),
                SampleValues::Light { lux } => sink.light(timestamp_ms, lux),
            }
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
