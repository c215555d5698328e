use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::db::{AudioSummary, AxisSummary, SensorChunk};
use crate::staging::classifier::{classify, SleepStage};
use crate::staging::config::ClassifierConfig;
use crate::staging::features::{analyze_audio, movement_intensity};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StagePoint {
    pub timestamp: DateTime<Utc>,
    pub stage: SleepStage,
}

/// Classify a session's chunks into a stage timeline.
///
/// One point per accelerometer chunk. Each point sees the trailing
/// accelerometer and gyroscope windows and the latest audio chunk at or
/// before it (ignored once older than `audio_max_age_ms`). Chunks without
/// any accelerometer summary only contribute context.
pub fn build_stage_timeline(chunks: &[SensorChunk], config: &ClassifierConfig) -> Vec<StagePoint> {
    let mut ordered: Vec<&SensorChunk> = chunks.iter().collect();
    // context channels first at equal timestamps so they can inform the motion chunk
    ordered.sort_by_key(|chunk| (chunk.timestamp_ms, chunk.accelerometer.is_some(), chunk.id));

    let accel_window = config.movement_window_chunks.max(1);
    let gyro_window = config
        .eye_movement_window_chunks
        .max(config.eye_movement_min_chunks)
        .max(1);

    let mut recent_accel: VecDeque<AxisSummary> = VecDeque::with_capacity(accel_window);
    let mut recent_gyro: VecDeque<AxisSummary> = VecDeque::with_capacity(gyro_window);
    let mut latest_audio: Option<(i64, &AudioSummary)> = None;
    let mut timeline = Vec::new();

    for chunk in ordered {
        if let Some(gyro) = chunk.gyroscope {
            if recent_gyro.len() == gyro_window {
                recent_gyro.pop_front();
            }
            recent_gyro.push_back(gyro);
        }
        if let Some(audio) = chunk.audio.as_ref() {
            latest_audio = Some((chunk.timestamp_ms, audio));
        }

        let Some(accel) = chunk.accelerometer else {
            continue;
        };
        if recent_accel.len() == accel_window {
            recent_accel.pop_front();
        }
        recent_accel.push_back(accel);

        let Some(timestamp) = DateTime::<Utc>::from_timestamp_millis(chunk.timestamp_ms) else {
            warn!(
                "Skipping chunk {:?} with out-of-range timestamp {}",
                chunk.id, chunk.timestamp_ms
            );
            continue;
        };

        let movement = movement_intensity(
            recent_accel.make_contiguous(),
            chunk.timestamp_ms,
            config,
        );
        let audio = latest_audio
            .filter(|(at, _)| chunk.timestamp_ms - at <= config.audio_max_age_ms)
            .map(|(_, summary)| analyze_audio(summary, config))
            .unwrap_or_default();
        let trailing_gyro: Vec<AxisSummary> = recent_gyro.iter().copied().collect();

        timeline.push(StagePoint {
            timestamp,
            stage: classify(&movement, &audio, &trailing_gyro, config),
        });
    }

    timeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AudioReading;

    fn axis(x: f64) -> AxisSummary {
        AxisSummary {
            x,
            y: 0.0,
            z: 0.0,
            sample_count: 30,
        }
    }

    fn accel_chunk(ts: i64, x: f64) -> SensorChunk {
        let mut chunk = SensorChunk::empty("s1", ts);
        chunk.accelerometer = Some(axis(x));
        chunk
    }

    fn gyro_chunk(ts: i64, x: f64) -> SensorChunk {
        let mut chunk = SensorChunk::empty("s1", ts);
        chunk.gyroscope = Some(axis(x));
        chunk
    }

    fn snoring_chunk(ts: i64) -> SensorChunk {
        let mut chunk = SensorChunk::empty("s1", ts);
        chunk.audio = Some(AudioSummary {
            mean_decibel: 45.0,
            peak_decibel: 45.0,
            readings: vec![
                AudioReading {
                    decibel: 45.0,
                    frequency_hz: 250.0,
                };
                10
            ],
        });
        chunk
    }

    #[test]
    fn test_still_night_is_all_deep() {
        let chunks: Vec<SensorChunk> = (0..20).map(|i| accel_chunk(i * 30_000, 0.02)).collect();
        let timeline = build_stage_timeline(&chunks, &ClassifierConfig::default());
        assert_eq!(timeline.len(), 20);
        assert!(timeline.iter().all(|p| p.stage == SleepStage::Deep));
    }

    #[test]
    fn test_only_motion_chunks_produce_points() {
        let chunks = vec![
            gyro_chunk(0, 0.1),
            accel_chunk(0, 0.02),
            snoring_chunk(10_000),
            accel_chunk(30_000, 0.02),
        ];
        let timeline = build_stage_timeline(&chunks, &ClassifierConfig::default());
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].timestamp.timestamp_millis(), 0);
        assert_eq!(timeline[1].timestamp.timestamp_millis(), 30_000);
    }

    #[test]
    fn test_rem_from_restless_gyro_and_snoring() {
        let config = ClassifierConfig::default();
        let mut chunks = Vec::new();
        for i in 0..6 {
            let ts = i * 30_000;
            chunks.push(gyro_chunk(ts, if i % 2 == 0 { 0.0 } else { 0.5 }));
            chunks.push(snoring_chunk(ts));
            chunks.push(accel_chunk(ts, 0.2));
        }
        let timeline = build_stage_timeline(&chunks, &config);
        assert_eq!(timeline.len(), 6);
        // fewer than five gyro chunks seen: light
        assert_eq!(timeline[0].stage, SleepStage::Light);
        assert_eq!(timeline[3].stage, SleepStage::Light);
        assert_eq!(timeline[4].stage, SleepStage::Rem);
        assert_eq!(timeline[5].stage, SleepStage::Rem);
    }

    #[test]
    fn test_stale_audio_is_ignored() {
        let config = ClassifierConfig::default();
        let chunks = vec![snoring_chunk(0), accel_chunk(120_000, 0.02)];
        let timeline = build_stage_timeline(&chunks, &config);
        // snoring from two minutes earlier would otherwise block deep
        assert_eq!(timeline[0].stage, SleepStage::Deep);

        let chunks = vec![snoring_chunk(0), accel_chunk(30_000, 0.02)];
        let timeline = build_stage_timeline(&chunks, &config);
        assert_eq!(timeline[0].stage, SleepStage::Light);
    }

    #[test]
    fn test_movement_window_smooths_single_spike() {
        let config = ClassifierConfig::default();
        let mut chunks: Vec<SensorChunk> = (0..9).map(|i| accel_chunk(i * 30_000, 0.0)).collect();
        chunks.push(accel_chunk(9 * 30_000, 0.9));
        let timeline = build_stage_timeline(&chunks, &config);
        // mean over ten chunks is 0.09, still below the low threshold
        assert_eq!(timeline[9].stage, SleepStage::Deep);
    }

    #[test]
    fn test_unordered_input_is_sorted() {
        let chunks = vec![accel_chunk(60_000, 0.0), accel_chunk(0, 0.0), accel_chunk(30_000, 0.0)];
        let timeline = build_stage_timeline(&chunks, &ClassifierConfig::default());
        let stamps: Vec<i64> = timeline.iter().map(|p| p.timestamp.timestamp_millis()).collect();
        assert_eq!(stamps, vec![0, 30_000, 60_000]);
    }
}
