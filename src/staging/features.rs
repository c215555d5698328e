//! Per-chunk features feeding the stage classifier.

use serde::{Deserialize, Serialize};

use crate::db::{AudioSummary, AxisSummary};
use crate::staging::config::ClassifierConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum MovementLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovementIntensity {
    pub level: MovementLevel,
    pub magnitude: f64,
    pub timestamp_ms: i64,
}

impl MovementLevel {
    pub fn from_magnitude(magnitude: f64, config: &ClassifierConfig) -> Self {
        if magnitude < config.movement_low_threshold {
            MovementLevel::None
        } else if magnitude < config.movement_medium_threshold {
            MovementLevel::Low
        } else if magnitude < config.movement_high_threshold {
            MovementLevel::Medium
        } else {
            MovementLevel::High
        }
    }
}

/// Mean magnitude of the given accelerometer chunks, bucketed into a level.
///
/// Expects gravity-compensated acceleration; a resting device then reads
/// close to zero. An empty window reads as no movement.
pub fn movement_intensity(
    recent: &[AxisSummary],
    timestamp_ms: i64,
    config: &ClassifierConfig,
) -> MovementIntensity {
    let magnitude = if recent.is_empty() {
        0.0
    } else {
        recent.iter().map(AxisSummary::magnitude).sum::<f64>() / recent.len() as f64
    };

    MovementIntensity {
        level: MovementLevel::from_magnitude(magnitude, config),
        magnitude,
        timestamp_ms,
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysis {
    pub is_snoring: bool,
    /// Mean loudness of the chunk (dB).
    pub noise_level: f64,
    pub has_high_noise: bool,
}

pub fn analyze_audio(summary: &AudioSummary, config: &ClassifierConfig) -> AudioAnalysis {
    let total = summary.readings.len();
    let in_band = summary
        .readings
        .iter()
        .filter(|r| {
            r.frequency_hz >= config.snore_min_hz
                && r.frequency_hz <= config.snore_max_hz
                && r.decibel > config.snore_min_decibel
        })
        .count();

    let is_snoring = total > 0 && in_band as f64 / total as f64 >= config.snore_min_fraction;
    let noise_level = if total > 0 {
        summary.readings.iter().map(|r| r.decibel).sum::<f64>() / total as f64
    } else {
        summary.mean_decibel
    };

    AudioAnalysis {
        is_snoring,
        noise_level,
        has_high_noise: noise_level > config.high_noise_decibel,
    }
}

/// Rapid-eye-movement proxy from head/phone rotation.
///
/// Takes the Euclidean norm of each trailing gyroscope chunk's mean vector
/// and reports `true` when their population variance exceeds the threshold.
/// This is a crude stand-in, not a validated REM detector.
pub fn eye_movement_present(trailing_gyro: &[AxisSummary], config: &ClassifierConfig) -> bool {
    if trailing_gyro.len() < config.eye_movement_min_chunks.max(1) {
        return false;
    }

    let window = config.eye_movement_window_chunks.max(config.eye_movement_min_chunks);
    let start = trailing_gyro.len().saturating_sub(window);
    let magnitudes: Vec<f64> = trailing_gyro[start..]
        .iter()
        .map(AxisSummary::magnitude)
        .collect();

    variance(&magnitudes) > config.eye_movement_variance_threshold
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64
}
