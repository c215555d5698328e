use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};

use crate::db::{
    connection::Database,
    models::{RawSample, SensorChunk, SensorKind},
    repositories::chunks::insert_chunk,
};

/// One fetched backlog row. Rows whose columns do not form a valid sample
/// keep their id so they can still be retired.
#[derive(Debug)]
pub struct BacklogRow {
    pub id: i64,
    pub sample: Result<RawSample>,
}

/// Unprocessed rows of one sensor kind, oldest first.
#[derive(Debug)]
pub struct KindBacklog {
    pub kind: SensorKind,
    pub rows: Vec<BacklogRow>,
    /// The query hit its limit, so more rows of this kind may be waiting.
    pub truncated: bool,
}

/// What to write for one backlog round: the chunks built from it, in the
/// order they are to be inserted, and every raw sample id to flag processed.
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub chunks: Vec<SensorChunk>,
    pub processed_ids: Vec<i64>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    /// Rows returned by the backlog queries, all kinds together.
    pub fetched: usize,
    /// At least one kind returned a full page.
    pub truncated: bool,
    /// Rows flipped to processed.
    pub processed: usize,
    /// Chunks written, with their assigned ids.
    pub chunks: Vec<SensorChunk>,
}

fn select_backlog(
    conn: &Connection,
    session_id: &str,
    kind: SensorKind,
    limit: usize,
) -> Result<Vec<BacklogRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, sensor_kind, timestamp_ms, v0, v1, v2, processed
         FROM raw_samples
         WHERE session_id = ?1 AND sensor_kind = ?2 AND processed = 0
         ORDER BY timestamp_ms ASC, id ASC
         LIMIT ?3",
    )?;
    let mapped = stmt.query_map(params![session_id, kind.as_str(), limit as i64], |row| {
        let id: i64 = row.get(0)?;
        let session_id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let timestamp_ms: i64 = row.get(3)?;
        let v0: Option<f64> = row.get(4)?;
        let v1: Option<f64> = row.get(5)?;
        let v2: Option<f64> = row.get(6)?;
        let processed: i64 = row.get(7)?;
        Ok(BacklogRow {
            id,
            sample: RawSample::from_columns(
                id,
                session_id,
                &kind,
                timestamp_ms,
                (v0, v1, v2),
                processed != 0,
            ),
        })
    })?;

    let mut rows = Vec::new();
    for row in mapped {
        rows.push(row?);
    }
    Ok(rows)
}

impl Database {
    /// Append raw samples in one transaction.
    pub async fn insert_raw_samples(&self, samples: &[RawSample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let samples = samples.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO raw_samples (session_id, sensor_kind, timestamp_ms, v0, v1, v2, processed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                )?;
                for sample in &samples {
                    let (v0, v1, v2) = sample.values.to_columns();
                    stmt.execute(params![
                        sample.session_id,
                        sample.kind.as_str(),
                        sample.timestamp_ms,
                        v0,
                        v1,
                        v2,
                    ])
                    .with_context(|| {
                        format!("failed to insert {} sample for session {}", sample.kind, sample.session_id)
                    })?;
                }
            }
            tx.commit()?;
            Ok(samples.len())
        })
        .await
    }

    /// Select up to `limit` oldest unprocessed samples of every kind, let
    /// `plan` turn them into chunks, then write the chunks and flip the
    /// processed flags, all in a single transaction. `plan` also receives the
    /// newest chunk timestamp already stored for the session.
    ///
    /// Chunks must arrive in non-decreasing timestamp order, starting no
    /// earlier than that stored timestamp. Any violation, or a failure in
    /// `plan` or a write, rolls the transaction back and leaves the backlog
    /// untouched.
    pub async fn process_backlog_round<F>(
        &self,
        session_id: &str,
        limit: usize,
        plan: F,
    ) -> Result<BatchOutcome>
    where
        F: FnOnce(Vec<KindBacklog>, Option<i64>) -> Result<BatchPlan> + Send + 'static,
    {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let watermark: Option<i64> = tx.query_row(
                "SELECT MAX(timestamp_ms) FROM sensor_chunks WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;

            let mut backlog = Vec::with_capacity(SensorKind::ALL.len());
            for kind in SensorKind::ALL {
                let rows = select_backlog(&tx, &session_id, kind, limit)?;
                backlog.push(KindBacklog {
                    kind,
                    truncated: rows.len() >= limit,
                    rows,
                });
            }
            let fetched = backlog.iter().map(|entry| entry.rows.len()).sum();
            let truncated = backlog.iter().any(|entry| entry.truncated);

            let plan = plan(backlog, watermark)?;

            let mut latest = watermark;
            let mut chunks = plan.chunks;
            for chunk in &mut chunks {
                if let Some(latest) = latest.filter(|&latest| chunk.timestamp_ms < latest) {
                    bail!(
                        "chunk at {} would precede chunk at {} in session {}",
                        chunk.timestamp_ms,
                        latest,
                        session_id
                    );
                }
                insert_chunk(&tx, chunk)?;
                chunk.id = Some(tx.last_insert_rowid());
                latest = Some(chunk.timestamp_ms);
            }

            {
                let mut stmt = tx.prepare(
                    "UPDATE raw_samples SET processed = 1 WHERE id = ?1 AND processed = 0",
                )?;
                for id in &plan.processed_ids {
                    if stmt.execute(params![id])? != 1 {
                        bail!("raw sample {id} was already processed");
                    }
                }
            }

            tx.commit().context("failed to commit backlog round")?;

            Ok(BatchOutcome {
                fetched,
                truncated,
                processed: plan.processed_ids.len(),
                chunks,
            })
        })
        .await
    }

    pub async fn count_unprocessed_samples(&self, session_id: &str) -> Result<usize> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM raw_samples
                 WHERE session_id = ?1
                   AND processed = 0
                   AND sensor_kind IN ('accel', 'gyro', 'audio', 'light')",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    /// Latest capture timestamp seen for a session, processed or not.
    pub async fn latest_sample_timestamp(&self, session_id: &str) -> Result<Option<i64>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let latest: Option<i64> = conn.query_row(
                "SELECT MAX(timestamp_ms) FROM raw_samples WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(latest)
        })
        .await
    }
}
