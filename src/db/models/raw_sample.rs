//! Raw sensor readings as delivered by capture sources.
//!
//! A `RawSample` is written once and never changed, except for the
//! `processed` flag which the chunk aggregator flips in the same transaction
//! that writes the chunk built from it.

use std::fmt;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Audio,
    Light,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Accelerometer,
        SensorKind::Gyroscope,
        SensorKind::Audio,
        SensorKind::Light,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "accel",
            SensorKind::Gyroscope => "gyro",
            SensorKind::Audio => "audio",
            SensorKind::Light => "light",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "accel" => Ok(SensorKind::Accelerometer),
            "gyro" => Ok(SensorKind::Gyroscope),
            "audio" => Ok(SensorKind::Audio),
            "light" => Ok(SensorKind::Light),
            other => Err(anyhow!("unknown sensor kind '{other}'")),
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel-specific payload of a reading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SampleValues {
    /// Three-axis reading for accelerometer (g) or gyroscope (rad/s).
    Motion { axes: [f64; 3] },
    Audio { decibel: f64, frequency_hz: f64 },
    Light { lux: f64 },
}

impl SampleValues {
    /// Storage columns `(v0, v1, v2)`.
    pub fn to_columns(&self) -> (f64, Option<f64>, Option<f64>) {
        match *self {
            SampleValues::Motion { axes } => (axes[0], Some(axes[1]), Some(axes[2])),
            SampleValues::Audio {
                decibel,
                frequency_hz,
            } => (decibel, Some(frequency_hz), None),
            SampleValues::Light { lux } => (lux, None, None),
        }
    }

    fn is_finite(&self) -> bool {
        match *self {
            SampleValues::Motion { axes } => axes.iter().all(|v| v.is_finite()),
            SampleValues::Audio {
                decibel,
                frequency_hz,
            } => decibel.is_finite() && frequency_hz.is_finite(),
            SampleValues::Light { lux } => lux.is_finite(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub id: Option<i64>,
    pub session_id: String,
    pub kind: SensorKind,
    pub timestamp_ms: i64,
    pub values: SampleValues,
    pub processed: bool,
}

impl RawSample {
    pub fn motion(session_id: &str, kind: SensorKind, timestamp_ms: i64, axes: [f64; 3]) -> Self {
        Self::new(session_id, kind, timestamp_ms, SampleValues::Motion { axes })
    }

    pub fn audio(session_id: &str, timestamp_ms: i64, decibel: f64, frequency_hz: f64) -> Self {
        Self::new(
            session_id,
            SensorKind::Audio,
            timestamp_ms,
            SampleValues::Audio {
                decibel,
                frequency_hz,
            },
        )
    }

    pub fn light(session_id: &str, timestamp_ms: i64, lux: f64) -> Self {
        Self::new(
            session_id,
            SensorKind::Light,
            timestamp_ms,
            SampleValues::Light { lux },
        )
    }

    fn new(session_id: &str, kind: SensorKind, timestamp_ms: i64, values: SampleValues) -> Self {
        Self {
            id: None,
            session_id: session_id.to_string(),
            kind,
            timestamp_ms,
            values,
            processed: false,
        }
    }

    /// Rebuilds a sample from its storage columns, rejecting rows whose values
    /// do not match the declared kind.
    pub fn from_columns(
        id: i64,
        session_id: String,
        kind: &str,
        timestamp_ms: i64,
        columns: (Option<f64>, Option<f64>, Option<f64>),
        processed: bool,
    ) -> Result<Self> {
        let kind = SensorKind::parse(kind)?;
        let values = match (kind, columns) {
            (SensorKind::Accelerometer | SensorKind::Gyroscope, (Some(x), Some(y), Some(z))) => {
                SampleValues::Motion { axes: [x, y, z] }
            }
            (SensorKind::Audio, (Some(decibel), Some(frequency_hz), _)) => SampleValues::Audio {
                decibel,
                frequency_hz,
            },
            (SensorKind::Light, (Some(lux), _, _)) => SampleValues::Light { lux },
            (kind, columns) => bail!("sample {id}: columns {columns:?} do not fit kind {kind}"),
        };

        if !values.is_finite() {
            bail!("sample {id}: non-finite reading {values:?}");
        }

        Ok(Self {
            id: Some(id),
            session_id,
            kind,
            timestamp_ms,
            values,
            processed,
        })
    }
}
