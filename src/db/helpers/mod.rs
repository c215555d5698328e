use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::db::models::StageSource;

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_stage_source(value: Option<String>) -> Result<Option<StageSource>> {
    match value.as_deref() {
        None => Ok(None),
        Some("Sensor") => Ok(Some(StageSource::Sensor)),
        Some("Estimated") => Ok(Some(StageSource::Estimated)),
        Some(other) => Err(anyhow!("unknown stage source {other}")),
    }
}

pub fn to_json<T: Serialize>(value: &Option<T>, field: &str) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|inner| {
            serde_json::to_string(inner).with_context(|| format!("failed to serialize {field}"))
        })
        .transpose()
}

pub fn from_json<T: DeserializeOwned>(value: Option<String>, field: &str) -> Result<Option<T>> {
    value
        .map(|raw| {
            serde_json::from_str(&raw).with_context(|| format!("failed to deserialize {field}"))
        })
        .transpose()
}

/// Wraps an `anyhow` error so it can be returned from a rusqlite row mapper.
pub fn to_sql_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    )))
}
