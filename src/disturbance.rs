//! Sound, light and movement spikes flagged per chunk.
//!
//! Disturbances are reported alongside staging and never feed the score.

use serde::{Deserialize, Serialize};

use crate::db::SensorChunk;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DisturbanceKind {
    Sound,
    Light,
    Movement,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisturbanceEvent {
    pub session_id: String,
    pub kind: DisturbanceKind,
    pub severity: Severity,
    pub timestamp_ms: i64,
    /// Peak decibel, peak lux or accelerometer magnitude that triggered it.
    pub value: f64,
}

/// Heuristic trigger levels; all comparisons are strict except movement,
/// which fires at the high-movement threshold itself.
#[derive(Debug, Clone)]
pub struct DisturbanceConfig {
    pub sound_threshold_db: f64,
    pub sound_medium_db: f64,
    pub sound_high_db: f64,
    pub light_threshold_lux: f64,
    pub light_medium_lux: f64,
    pub light_high_lux: f64,
    pub movement_threshold: f64,
}

impl Default for DisturbanceConfig {
    fn default() -> Self {
        Self {
            sound_threshold_db: 60.0,
            sound_medium_db: 50.0,
            sound_high_db: 70.0,
            light_threshold_lux: 10.0,
            light_medium_lux: 20.0,
            light_high_lux: 50.0,
            movement_threshold: 1.5,
        }
    }
}

fn tiered(value: f64, medium: f64, high: f64) -> Severity {
    if value > high {
        Severity::High
    } else if value > medium {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Events raised by one chunk, in sound, light, movement order.
pub fn detect(chunk: &SensorChunk, config: &DisturbanceConfig) -> Vec<DisturbanceEvent> {
    let mut events = Vec::new();
    let mut push = |kind, severity, value| {
        events.push(DisturbanceEvent {
            session_id: chunk.session_id.clone(),
            kind,
            severity,
            timestamp_ms: chunk.timestamp_ms,
            value,
        })
    };

    if let Some(audio) = chunk.audio.as_ref() {
        let level = audio.peak_decibel;
        if level > config.sound_threshold_db {
            push(
                DisturbanceKind::Sound,
                tiered(level, config.sound_medium_db, config.sound_high_db),
                level,
            );
        }
    }

    if let Some(light) = chunk.light {
        let lux = light.max_lux;
        if lux > config.light_threshold_lux {
            push(
                DisturbanceKind::Light,
                tiered(lux, config.light_medium_lux, config.light_high_lux),
                lux,
            );
        }
    }

    if let Some(accel) = chunk.accelerometer {
        let magnitude = accel.magnitude();
        if config.movement_threshold > 0.0 && magnitude >= config.movement_threshold {
            let ratio = magnitude / config.movement_threshold;
            let severity = if ratio >= 3.0 {
                Severity::High
            } else if ratio >= 2.0 {
                Severity::Medium
            } else {
                Severity::Low
            };
            push(DisturbanceKind::Movement, severity, magnitude);
        }
    }

    events
}
