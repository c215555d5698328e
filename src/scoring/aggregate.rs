use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{StageHours, StageSource};
use crate::scoring::config::ScoringConfig;
use crate::staging::{SleepStage, StagePoint};

/// Whole-night stage totals plus the timing metrics derived with them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageBreakdown {
    pub stages: StageHours,
    pub source: StageSource,
    pub awake_count: u32,
    pub sleep_latency_min: f64,
}

/// Fixed split used when a session has nothing to classify.
pub fn estimated_breakdown(duration_hours: f64, config: &ScoringConfig) -> StageBreakdown {
    StageBreakdown {
        stages: StageHours {
            light: duration_hours * config.fallback_light_fraction,
            deep: duration_hours * config.fallback_deep_fraction,
            rem: duration_hours * config.fallback_rem_fraction,
            awake: 0.0,
        },
        source: StageSource::Estimated,
        awake_count: 0,
        sleep_latency_min: 0.0,
    }
}

/// Fold a stage timeline into hours per stage.
///
/// Each point carries an equal share of `duration_hours`, so the four stage
/// totals always add up to the duration. Sleep onset is the first asleep
/// point (the session starts in the awake state); `awake_count` counts
/// asleep to awake transitions. An empty timeline yields the estimated split.
pub fn aggregate_stages(
    timeline: &[StagePoint],
    session_start: DateTime<Utc>,
    duration_hours: f64,
    config: &ScoringConfig,
) -> StageBreakdown {
    if timeline.is_empty() {
        return estimated_breakdown(duration_hours, config);
    }

    let (mut light, mut deep, mut rem, mut awake) = (0usize, 0usize, 0usize, 0usize);
    let mut awake_count = 0u32;
    let mut onset: Option<DateTime<Utc>> = None;
    let mut was_asleep = false;

    for point in timeline {
        match point.stage {
            SleepStage::Light => light += 1,
            SleepStage::Deep => deep += 1,
            SleepStage::Rem => rem += 1,
            SleepStage::Awake => awake += 1,
        }

        let asleep = point.stage.is_asleep();
        if asleep && onset.is_none() {
            onset = Some(point.timestamp);
        }
        if was_asleep && !asleep {
            awake_count += 1;
        }
        was_asleep = asleep;
    }

    let total = timeline.len() as f64;
    let share = |count: usize| duration_hours * count as f64 / total;

    let sleep_latency_min = onset
        .map(|onset| ((onset - session_start).num_milliseconds() as f64 / 60_000.0).max(0.0))
        .unwrap_or(0.0);

    StageBreakdown {
        stages: StageHours {
            light: share(light),
            deep: share(deep),
            rem: share(rem),
            awake: share(awake),
        },
        source: StageSource::Sensor,
        awake_count,
        sleep_latency_min,
    }
}
