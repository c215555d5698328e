//! Fixed-window aggregates of raw samples, one channel summary per sensor.

use serde::{Deserialize, Serialize};

/// Per-axis means over one chunk of motion samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AxisSummary {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub sample_count: usize,
}

impl AxisSummary {
    /// Euclidean norm of the mean vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioReading {
    pub decibel: f64,
    pub frequency_hz: f64,
}

/// Audio chunk summary. Readings are kept so snoring detection can apply
/// its own frequency band and loudness floor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioSummary {
    pub mean_decibel: f64,
    pub peak_decibel: f64,
    pub readings: Vec<AudioReading>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LightSummary {
    pub mean_lux: f64,
    pub max_lux: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorChunk {
    pub id: Option<i64>,
    pub session_id: String,
    /// Timestamp of the first sample in the chunk.
    pub timestamp_ms: i64,
    pub accelerometer: Option<AxisSummary>,
    pub gyroscope: Option<AxisSummary>,
    pub audio: Option<AudioSummary>,
    pub light: Option<LightSummary>,
}

impl SensorChunk {
    pub fn empty(session_id: &str, timestamp_ms: i64) -> Self {
        Self {
            id: None,
            session_id: session_id.to_string(),
            timestamp_ms,
            accelerometer: None,
            gyroscope: None,
            audio: None,
            light: None,
        }
    }

    /// Raw samples folded into this chunk across all channels.
    pub fn sample_count(&self) -> usize {
        self.accelerometer.map_or(0, |s| s.sample_count)
            + self.gyroscope.map_or(0, |s| s.sample_count)
            + self.audio.as_ref().map_or(0, |s| s.readings.len())
            + self.light.map_or(0, |s| s.sample_count)
    }
}
