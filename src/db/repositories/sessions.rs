use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_stage_source},
    models::{SessionMetrics, SleepSession, StageHours},
};
use crate::error::ValidationError;

const SESSION_COLUMNS: &str = "id, user_id, start_at, end_at, duration_min, light_hours, deep_hours, rem_hours, awake_hours, stage_source, sleep_score, awake_count, sleep_latency_min, interrupted, evaluated_at, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<SleepSession> {
    let start_at: String = row.get("start_at")?;
    let end_at: Option<String> = row.get("end_at")?;
    let evaluated_at: Option<String> = row.get("evaluated_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let stage_source: Option<String> = row.get("stage_source")?;
    let sleep_score: Option<i64> = row.get("sleep_score")?;
    let awake_count: i64 = row.get("awake_count")?;
    let interrupted: i64 = row.get("interrupted")?;

    let light: Option<f64> = row.get("light_hours")?;
    let deep: Option<f64> = row.get("deep_hours")?;
    let rem: Option<f64> = row.get("rem_hours")?;
    let awake: Option<f64> = row.get("awake_hours")?;
    let stages = match (light, deep, rem) {
        (Some(light), Some(deep), Some(rem)) => Some(StageHours {
            light,
            deep,
            rem,
            awake: awake.unwrap_or(0.0),
        }),
        _ => None,
    };

    Ok(SleepSession {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        start_at: parse_datetime(&start_at, "start_at")?,
        end_at: parse_optional_datetime(end_at, "end_at")?,
        duration_min: row.get("duration_min")?,
        stages,
        stage_source: parse_stage_source(stage_source)?,
        sleep_score: sleep_score.map(|score| score.clamp(0, 100) as u8),
        awake_count: u32::try_from(awake_count).context("awake_count out of range")?,
        sleep_latency_min: row.get("sleep_latency_min")?,
        interrupted: interrupted != 0,
        evaluated_at: parse_optional_datetime(evaluated_at, "evaluated_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn query_session(conn: &Connection, session_id: &str) -> Result<Option<SleepSession>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sleep_sessions WHERE id = ?1"
    ))?;
    let mut rows = stmt.query(params![session_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_session(row)?)),
        None => Ok(None),
    }
}

fn query_sessions(conn: &Connection, sql: &str, user_id: Option<&str>) -> Result<Vec<SleepSession>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = match user_id {
        Some(user_id) => stmt.query(params![user_id])?,
        None => stmt.query([])?,
    };
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

impl Database {
    pub async fn insert_session(&self, session: &SleepSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sleep_sessions (id, user_id, start_at, end_at, duration_min, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.user_id,
                    record.start_at.to_rfc3339(),
                    record.end_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.duration_min,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert session")?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SleepSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| query_session(conn, &session_id)).await
    }

    /// Most recent session of `user_id` that has not ended yet.
    pub async fn get_active_session(&self, user_id: &str) -> Result<Option<SleepSession>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sleep_sessions
                 WHERE user_id = ?1 AND end_at IS NULL
                 ORDER BY start_at DESC
                 LIMIT 1"
            );
            Ok(query_sessions(conn, &sql, Some(&user_id))?.into_iter().next())
        })
        .await
    }

    pub async fn get_active_sessions(&self) -> Result<Vec<SleepSession>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sleep_sessions
                 WHERE end_at IS NULL
                 ORDER BY start_at ASC"
            );
            query_sessions(conn, &sql, None)
        })
        .await
    }

    /// Sets `end_at` and `duration_min`. Only succeeds once per session.
    pub async fn complete_session(
        &self,
        session_id: &str,
        end_at: DateTime<Utc>,
        interrupted: bool,
    ) -> Result<SleepSession> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let session = query_session(conn, &session_id)?
                .ok_or_else(|| ValidationError::SessionNotFound(session_id.clone()))?;
            if session.end_at.is_some() {
                return Err(ValidationError::SessionAlreadyCompleted(session_id).into());
            }

            let duration_min = (end_at - session.start_at).num_milliseconds() as f64 / 60_000.0;
            if duration_min < 0.0 {
                return Err(ValidationError::InvalidDuration {
                    session_id,
                    duration_min,
                }
                .into());
            }

            conn.execute(
                "UPDATE sleep_sessions
                 SET end_at = ?1,
                     duration_min = ?2,
                     interrupted = ?3,
                     updated_at = ?4
                 WHERE id = ?5 AND end_at IS NULL",
                params![
                    end_at.to_rfc3339(),
                    duration_min,
                    interrupted as i64,
                    end_at.to_rfc3339(),
                    session_id,
                ],
            )
            .with_context(|| "failed to complete session")?;

            query_session(conn, &session_id)?
                .ok_or_else(|| ValidationError::SessionNotFound(session_id).into())
        })
        .await
    }

    /// Stores evaluation outputs. Returns `false` when the session was already
    /// evaluated, in which case nothing is written.
    pub async fn save_session_metrics(
        &self,
        session_id: &str,
        metrics: &SessionMetrics,
        evaluated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let session_id = session_id.to_string();
        let metrics = metrics.clone();
        self.execute(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE sleep_sessions
                     SET light_hours = ?1,
                         deep_hours = ?2,
                         rem_hours = ?3,
                         awake_hours = ?4,
                         stage_source = ?5,
                         sleep_score = ?6,
                         awake_count = ?7,
                         sleep_latency_min = ?8,
                         evaluated_at = ?9,
                         updated_at = ?9
                     WHERE id = ?10 AND end_at IS NOT NULL AND evaluated_at IS NULL",
                    params![
                        metrics.stages.light,
                        metrics.stages.deep,
                        metrics.stages.rem,
                        metrics.stages.awake,
                        metrics.stage_source.as_str(),
                        i64::from(metrics.sleep_score),
                        i64::from(metrics.awake_count),
                        metrics.sleep_latency_min,
                        evaluated_at.to_rfc3339(),
                        session_id,
                    ],
                )
                .with_context(|| "failed to save session metrics")?;
            Ok(rows_affected == 1)
        })
        .await
    }

    /// Delete a session together with its raw samples and chunks.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM raw_samples WHERE session_id = ?1",
                params![session_id],
            )?;
            tx.execute(
                "DELETE FROM sensor_chunks WHERE session_id = ?1",
                params![session_id],
            )?;
            tx.execute(
                "DELETE FROM sleep_sessions WHERE id = ?1",
                params![session_id],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT id FROM sleep_sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }
}
