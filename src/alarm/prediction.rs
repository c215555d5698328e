use chrono::{DateTime, Duration, Utc};

use crate::staging::{SleepStage, StagePoint};

/// One idealised 90-minute sleep cycle as (stage, minutes).
const CYCLE: [(SleepStage, i64); 4] = [
    (SleepStage::Light, 30),
    (SleepStage::Deep, 18),
    (SleepStage::Light, 20),
    (SleepStage::Rem, 22),
];

const CYCLE_MINUTES: i64 = 90;

fn stage_at_minute(minute: i64) -> SleepStage {
    let mut offset = minute.rem_euclid(CYCLE_MINUTES);
    for (stage, length) in CYCLE {
        if offset < length {
            return stage;
        }
        offset -= length;
    }
    SleepStage::Light
}

/// Minute-resolution stage timeline of repeated cycles from `start`.
/// Non-positive lengths yield an empty timeline.
pub fn predicted_timeline(start: DateTime<Utc>, total: Duration) -> Vec<StagePoint> {
    let minutes = total.num_minutes().max(0);
    (0..minutes)
        .map(|minute| StagePoint {
            timestamp: start + Duration::minutes(minute),
            stage: stage_at_minute(minute),
        })
        .collect()
}
