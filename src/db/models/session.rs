//! Sleep session record and its evaluation outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where stage hours came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StageSource {
    /// Derived from classified sensor chunks.
    Sensor,
    /// Fixed statistical split used when no chunk could be classified.
    Estimated,
}

impl StageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageSource::Sensor => "Sensor",
            StageSource::Estimated => "Estimated",
        }
    }
}

/// Hours spent in each stage. The four fields sum to the session duration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageHours {
    pub light: f64,
    pub deep: f64,
    pub rem: f64,
    pub awake: f64,
}

impl StageHours {
    pub fn asleep(&self) -> f64 {
        self.light + self.deep + self.rem
    }

    pub fn total(&self) -> f64 {
        self.asleep() + self.awake
    }
}

/// Outputs of one evaluation pass, persisted write-once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub stages: StageHours,
    pub stage_source: StageSource,
    pub sleep_score: u8,
    pub awake_count: u32,
    pub sleep_latency_min: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SleepSession {
    pub id: String,
    pub user_id: String,
    pub start_at: DateTime<Utc>,
    /// Absent while tracking is in progress.
    pub end_at: Option<DateTime<Utc>>,
    pub duration_min: Option<f64>,
    pub stages: Option<StageHours>,
    pub stage_source: Option<StageSource>,
    pub sleep_score: Option<u8>,
    pub awake_count: u32,
    pub sleep_latency_min: f64,
    /// Closed by crash recovery rather than an explicit stop.
    pub interrupted: bool,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SleepSession {
    pub fn start(id: String, user_id: String, start_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            start_at,
            end_at: None,
            duration_min: None,
            stages: None,
            stage_source: None,
            sleep_score: None,
            awake_count: 0,
            sleep_latency_min: 0.0,
            interrupted: false,
            evaluated_at: None,
            created_at: start_at,
            updated_at: start_at,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated_at.is_some()
    }

    pub fn apply_metrics(&mut self, metrics: &SessionMetrics, evaluated_at: DateTime<Utc>) {
        self.stages = Some(metrics.stages);
        self.stage_source = Some(metrics.stage_source);
        self.sleep_score = Some(metrics.sleep_score);
        self.awake_count = metrics.awake_count;
        self.sleep_latency_min = metrics.sleep_latency_min;
        self.evaluated_at = Some(evaluated_at);
        self.updated_at = evaluated_at;
    }
}
