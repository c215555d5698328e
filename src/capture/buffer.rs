use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::db::{RawSample, SensorKind};

/// In-memory queue between sensor callbacks and the capture loop.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    queue: Arc<Mutex<VecDeque<RawSample>>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RawSample>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, sample: RawSample) {
        self.lock().push_back(sample);
    }

    /// Take everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<RawSample> {
        self.lock().drain(..).collect()
    }

    /// Put samples back at the head of the queue, ahead of anything pushed
    /// since they were drained.
    pub fn requeue(&self, samples: Vec<RawSample>) {
        let mut queue = self.lock();
        for sample in samples.into_iter().rev() {
            queue.push_front(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Cloneable producer handle given to each sensor source. Stamps samples
/// with the session they belong to.
#[derive(Debug, Clone)]
pub struct SampleSink {
    session_id: Arc<str>,
    buffer: SampleBuffer,
}

impl SampleSink {
    pub fn new(session_id: &str, buffer: SampleBuffer) -> Self {
        Self {
            session_id: Arc::from(session_id),
            buffer,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn motion(&self, kind: SensorKind, timestamp_ms: i64, axes: [f64; 3]) {
        self.buffer
            .push(RawSample::motion(&self.session_id, kind, timestamp_ms, axes));
    }

    pub fn audio(&self, timestamp_ms: i64, decibel: f64, frequency_hz: f64) {
        self.buffer.push(RawSample::audio(
            &self.session_id,
            timestamp_ms,
            decibel,
            frequency_hz,
        ));
    }

    pub fn light(&self, timestamp_ms: i64, lux: f64) {
        self.buffer
            .push(RawSample::light(&self.session_id, timestamp_ms, lux));
    }
}
