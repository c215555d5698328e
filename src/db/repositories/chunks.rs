use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{from_json, to_json, to_sql_error},
    models::SensorChunk,
};

/// Insert one chunk using the caller's connection or transaction.
pub(crate) fn insert_chunk(conn: &Connection, chunk: &SensorChunk) -> Result<()> {
    conn.execute(
        "INSERT INTO sensor_chunks (
            session_id,
            timestamp_ms,
            accelerometer_json,
            gyroscope_json,
            audio_json,
            light_json,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            chunk.session_id,
            chunk.timestamp_ms,
            to_json(&chunk.accelerometer, "accelerometer summary")?,
            to_json(&chunk.gyroscope, "gyroscope summary")?,
            to_json(&chunk.audio, "audio summary")?,
            to_json(&chunk.light, "light summary")?,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("failed to insert chunk for session {}", chunk.session_id))?;
    Ok(())
}

fn row_to_chunk(row: &Row) -> Result<SensorChunk, rusqlite::Error> {
    let accelerometer: Option<String> = row.get("accelerometer_json")?;
    let gyroscope: Option<String> = row.get("gyroscope_json")?;
    let audio: Option<String> = row.get("audio_json")?;
    let light: Option<String> = row.get("light_json")?;

    Ok(SensorChunk {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        timestamp_ms: row.get("timestamp_ms")?,
        accelerometer: from_json(accelerometer, "accelerometer_json").map_err(to_sql_error)?,
        gyroscope: from_json(gyroscope, "gyroscope_json").map_err(to_sql_error)?,
        audio: from_json(audio, "audio_json").map_err(to_sql_error)?,
        light: from_json(light, "light_json").map_err(to_sql_error)?,
    })
}

impl Database {
    /// All chunks of a session in timestamp order.
    pub async fn get_chunks_for_session(&self, session_id: &str) -> Result<Vec<SensorChunk>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, timestamp_ms, accelerometer_json, gyroscope_json, audio_json, light_json
                 FROM sensor_chunks
                 WHERE session_id = ?1
                 ORDER BY timestamp_ms ASC, id ASC",
            )?;

            let chunks_iter = stmt.query_map(params![session_id], row_to_chunk)?;
            let mut chunks = Vec::new();
            for chunk in chunks_iter {
                chunks.push(chunk?);
            }
            Ok(chunks)
        })
        .await
    }

    /// Chunks written after `after_id`, in creation order.
    pub async fn get_chunks_after(
        &self,
        session_id: &str,
        after_id: i64,
    ) -> Result<Vec<SensorChunk>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, timestamp_ms, accelerometer_json, gyroscope_json, audio_json, light_json
                 FROM sensor_chunks
                 WHERE session_id = ?1 AND id > ?2
                 ORDER BY id ASC",
            )?;

            let chunks_iter = stmt.query_map(params![session_id, after_id], row_to_chunk)?;
            let mut chunks = Vec::new();
            for chunk in chunks_iter {
                chunks.push(chunk?);
            }
            Ok(chunks)
        })
        .await
    }

    pub async fn count_chunks(&self, session_id: &str) -> Result<usize> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sensor_chunks WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{AudioReading, AudioSummary, AxisSummary, SleepSession};

    #[tokio::test]
    async fn test_chunk_summaries_survive_storage() {
        let db = Database::open_in_memory().expect("open db");
        db.insert_session(&SleepSession::start("s1".into(), "u1".into(), Utc::now()))
            .await
            .unwrap();

        let mut chunk = SensorChunk::empty("s1", 3_000);
        chunk.accelerometer = Some(AxisSummary {
            x: 0.1,
            y: -0.2,
            z: 0.98,
            sample_count: 30,
        });
        chunk.audio = Some(AudioSummary {
            mean_decibel: 41.5,
            peak_decibel: 44.0,
            readings: vec![AudioReading {
                decibel: 44.0,
                frequency_hz: 310.0,
            }],
        });

        let stored = chunk.clone();
        db.execute(move |conn| insert_chunk(conn, &stored)).await.unwrap();

        let chunks = db.get_chunks_for_session("s1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].id.is_some());
        assert_eq!(chunks[0].accelerometer, chunk.accelerometer);
        assert_eq!(chunks[0].audio, chunk.audio);
        assert!(chunks[0].gyroscope.is_none());

        let first_id = chunks[0].id.unwrap();
        assert!(db.get_chunks_after("s1", first_id).await.unwrap().is_empty());
    }
}
