//! Turns the raw-sample backlog into chunks, one bounded transaction at a time.

use anyhow::Result;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::chunking::config::ChunkingConfig;
use crate::db::{
    AudioReading, AudioSummary, AxisSummary, BatchPlan, Database, KindBacklog, LightSummary,
    RawSample, SampleValues, SensorChunk, SensorKind,
};

/// Result of one aggregation run across all sensor kinds.
#[derive(Debug, Default)]
pub struct ChunkRun {
    /// Raw samples folded into chunks.
    pub processed: usize,
    /// Chunks written, in creation order.
    pub chunks: Vec<SensorChunk>,
    /// Rows retired because they could not be parsed.
    pub malformed: usize,
    /// Batches abandoned because the transaction failed.
    pub failed_batches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TailPolicy {
    /// Leave a trailing partial group for the next run.
    Keep,
    /// Chunk the trailing partial group once the backlog is exhausted.
    Flush,
}

#[derive(Clone)]
pub struct ChunkAggregator {
    db: Database,
    config: ChunkingConfig,
}

impl ChunkAggregator {
    pub fn new(db: Database, config: ChunkingConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk every full group in the session's backlog. Returns the number of
    /// raw samples folded into chunks. Batch failures are logged and end the
    /// run for that sensor kind; the samples stay queued for the next call.
    pub async fn process_session_data(&self, session_id: &str) -> usize {
        self.run(session_id, TailPolicy::Keep, None).await.processed
    }

    /// Like [`process_session_data`](Self::process_session_data) but reports
    /// the chunks written and stops between batches once `cancel` fires.
    pub async fn process_with_cancel(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> ChunkRun {
        self.run(session_id, TailPolicy::Keep, Some(cancel)).await
    }

    /// Chunk the whole backlog, including each kind's trailing partial group.
    /// Used when a session ends so nothing captured is left behind.
    pub async fn drain_session_data(&self, session_id: &str) -> ChunkRun {
        self.run(session_id, TailPolicy::Flush, None).await
    }

    pub async fn needs_processing(&self, session_id: &str) -> Result<bool> {
        Ok(self.db.count_unprocessed_samples(session_id).await? > 0)
    }

    async fn run(
        &self,
        session_id: &str,
        tail: TailPolicy,
        cancel: Option<&CancellationToken>,
    ) -> ChunkRun {
        let mut run = ChunkRun::default();
        let rules = PlanRules {
            chunk_size: self.config.chunk_size.max(1),
            flush_tails: tail == TailPolicy::Flush,
            stale_group_ms: self.config.stale_group_ms,
        };
        // a page must be able to hold at least one full group
        let batch_size = self.config.batch_size.max(rules.chunk_size);

        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                debug!("chunking cancelled for session {session_id}");
                break;
            }

            let planner_session = session_id.to_string();
            let outcome = self
                .db
                .process_backlog_round(session_id, batch_size, move |backlog, watermark| {
                    Ok(plan_round(&planner_session, backlog, watermark, rules))
                })
                .await;

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!("chunk batch for session {session_id} abandoned: {err:#}");
                    run.failed_batches += 1;
                    break;
                }
            };

            let chunked: usize = outcome.chunks.iter().map(SensorChunk::sample_count).sum();
            run.processed += chunked;
            run.malformed += outcome.processed - chunked;
            run.chunks.extend(outcome.chunks);

            if !outcome.truncated || outcome.processed == 0 {
                break;
            }
        }

        if run.processed > 0 || run.malformed > 0 {
            info!(
                "Chunked {} samples into {} chunks for session {} ({} malformed, {} failed batches)",
                run.processed,
                run.chunks.len(),
                session_id,
                run.malformed,
                run.failed_batches
            );
        }

        run
    }
}

#[derive(Debug, Clone, Copy)]
struct PlanRules {
    chunk_size: usize,
    flush_tails: bool,
    stale_group_ms: i64,
}

/// One kind's share of a round after grouping.
struct KindGroups {
    kind: SensorKind,
    full: Vec<Vec<RawSample>>,
    leftover: Vec<RawSample>,
    truncated: bool,
}

impl KindGroups {
    /// Earliest timestamp a later chunk of this kind can start at, or `None`
    /// when nothing of this kind is left behind.
    fn boundary(&self, flush_leftover: bool) -> Option<i64> {
        match self.leftover.first() {
            Some(first) if !flush_leftover => Some(first.timestamp_ms),
            _ if self.truncated => self
                .full
                .last()
                .and_then(|group| group.last())
                .map(|sample| sample.timestamp_ms),
            _ => None,
        }
    }
}

/// Group one round of backlog rows into chunks, across all kinds.
///
/// Chunks come out in timestamp order and never start after the point where
/// some kind still has samples waiting, so chunks written by later rounds
/// cannot start earlier than these. A kind's trailing partial group is
/// chunked when draining, when it is older than `stale_group_ms` relative to
/// the newest fetched sample, or when it would otherwise block a round that
/// has more rows waiting. Rows that fail to parse are retired without
/// contributing to a chunk.
fn plan_round(
    session_id: &str,
    backlog: Vec<KindBacklog>,
    watermark: Option<i64>,
    rules: PlanRules,
) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut kinds = Vec::with_capacity(backlog.len());

    for entry in backlog {
        let mut samples = Vec::with_capacity(entry.rows.len());
        for row in entry.rows {
            match row.sample {
                Ok(sample) => samples.push(sample),
                Err(err) => {
                    warn!("skipping malformed raw sample {}: {err:#}", row.id);
                    plan.processed_ids.push(row.id);
                }
            }
        }

        let mut full: Vec<Vec<RawSample>> = samples
            .chunks(rules.chunk_size)
            .map(<[RawSample]>::to_vec)
            .collect();
        let leftover = if full.last().is_some_and(|group| group.len() < rules.chunk_size) {
            full.pop().unwrap_or_default()
        } else {
            Vec::new()
        };
        kinds.push(KindGroups {
            kind: entry.kind,
            full,
            leftover,
            truncated: entry.truncated,
        });
    }

    let newest = kinds
        .iter()
        .flat_map(|groups| groups.full.iter().flatten().chain(&groups.leftover))
        .map(|sample| sample.timestamp_ms)
        .max();
    let flush_leftover = |groups: &KindGroups, force: bool| {
        !groups.truncated
            && groups.leftover.first().is_some_and(|first| {
                rules.flush_tails
                    || force
                    || newest.is_some_and(|newest| newest - first.timestamp_ms >= rules.stale_group_ms)
            })
    };

    let mut selected = select_groups(&kinds, |groups| flush_leftover(groups, false));
    if selected.is_empty() && kinds.iter().any(|groups| groups.truncated) {
        selected = select_groups(&kinds, |groups| flush_leftover(groups, true));
    }
    selected.sort_by_key(|(_, group)| group[0].timestamp_ms);

    for (kind, group) in selected {
        let Some(mut chunk) = summarize_group(session_id, kind, group) else {
            continue;
        };
        if let Some(watermark) = watermark.filter(|&watermark| chunk.timestamp_ms < watermark) {
            debug!(
                "{kind} samples from {} arrived after chunk at {}; stamping at the latter",
                chunk.timestamp_ms, watermark
            );
            chunk.timestamp_ms = watermark;
        }
        plan.chunks.push(chunk);
        plan.processed_ids
            .extend(group.iter().filter_map(|sample| sample.id));
    }

    plan
}

/// Groups whose first timestamp does not pass the earliest kind boundary,
/// stable in kind order.
fn select_groups<'a>(
    kinds: &'a [KindGroups],
    flush_leftover: impl Fn(&KindGroups) -> bool,
) -> Vec<(SensorKind, &'a [RawSample])> {
    let cut = kinds
        .iter()
        .filter_map(|groups| groups.boundary(flush_leftover(groups)))
        .min();

    let mut selected = Vec::new();
    for groups in kinds {
        let tail = flush_leftover(groups)
            .then_some(groups.leftover.as_slice())
            .into_iter();
        for group in groups.full.iter().map(Vec::as_slice).chain(tail) {
            let Some(first) = group.first() else {
                continue;
            };
            if cut.is_some_and(|cut| first.timestamp_ms > cut) {
                break;
            }
            selected.push((groups.kind, group));
        }
    }
    selected
}

/// Build a chunk from consecutive samples of one kind. `None` for an empty group.
fn summarize_group(session_id: &str, kind: SensorKind, group: &[RawSample]) -> Option<SensorChunk> {
    let first = group.first()?;
    let mut chunk = SensorChunk::empty(session_id, first.timestamp_ms);

    match kind {
        SensorKind::Accelerometer => chunk.accelerometer = Some(mean_axes(group)),
        SensorKind::Gyroscope => chunk.gyroscope = Some(mean_axes(group)),
        SensorKind::Audio => {
            let readings: Vec<AudioReading> = group
                .iter()
                .filter_map(|sample| match sample.values {
                    SampleValues::Audio {
                        decibel,
                        frequency_hz,
                    } => Some(AudioReading {
                        decibel,
                        frequency_hz,
                    }),
                    _ => None,
                })
                .collect();
            let count = readings.len().max(1) as f64;
            chunk.audio = Some(AudioSummary {
                mean_decibel: readings.iter().map(|r| r.decibel).sum::<f64>() / count,
                // readings may be negative (dBFS); only an empty group reads 0
                peak_decibel: readings
                    .iter()
                    .map(|r| r.decibel)
                    .reduce(f64::max)
                    .unwrap_or(0.0),
                readings,
            });
        }
        SensorKind::Light => {
            let lux: Vec<f64> = group
                .iter()
                .filter_map(|sample| match sample.values {
                    SampleValues::Light { lux } => Some(lux),
                    _ => None,
                })
                .collect();
            let count = lux.len().max(1) as f64;
            chunk.light = Some(LightSummary {
                mean_lux: lux.iter().sum::<f64>() / count,
                max_lux: lux.iter().copied().reduce(f64::max).unwrap_or(0.0),
                sample_count: lux.len(),
            });
        }
    }

    Some(chunk)
}

fn mean_axes(group: &[RawSample]) -> AxisSummary {
    let mut sums = [0.0_f64; 3];
    let mut count = 0usize;
    for sample in group {
        if let SampleValues::Motion { axes } = sample.values {
            for (sum, value) in sums.iter_mut().zip(axes) {
                *sum += value;
            }
            count += 1;
        }
    }
    let divisor = count.max(1) as f64;
    AxisSummary {
        x: sums[0] / divisor,
        y: sums[1] / divisor,
        z: sums[2] / divisor,
        sample_count: count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BacklogRow, SleepSession};
    use approx::assert_relative_eq;
    use chrono::Utc;

    const SESSION: &str = "night-1";

    async fn setup() -> Database {
        let db = Database::open_in_memory().expect("open db");
        db.insert_session(&SleepSession::start(SESSION.into(), "u1".into(), Utc::now()))
            .await
            .expect("insert session");
        db
    }

    fn accel_samples(count: i64) -> Vec<RawSample> {
        (0..count)
            .map(|i| {
                RawSample::motion(
                    SESSION,
                    SensorKind::Accelerometer,
                    i * 100,
                    [0.01 * i as f64, 0.0, 1.0],
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_thousand_samples_make_thirty_three_chunks() {
        let db = setup().await;
        db.insert_raw_samples(&accel_samples(1000)).await.unwrap();

        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        assert_eq!(aggregator.process_session_data(SESSION).await, 990);
        assert_eq!(db.count_chunks(SESSION).await.unwrap(), 33);
        assert_eq!(db.count_unprocessed_samples(SESSION).await.unwrap(), 10);
        assert!(aggregator.needs_processing(SESSION).await.unwrap());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let db = setup().await;
        db.insert_raw_samples(&accel_samples(1000)).await.unwrap();

        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        aggregator.process_session_data(SESSION).await;
        assert_eq!(aggregator.process_session_data(SESSION).await, 0);
        assert_eq!(db.count_chunks(SESSION).await.unwrap(), 33);
    }

    fn assert_creation_order_monotonic(chunks: &[SensorChunk]) {
        assert!(!chunks.is_empty());
        let ids: Vec<i64> = chunks.iter().filter_map(|c| c.id).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(
            chunks
                .windows(2)
                .all(|pair| pair[0].timestamp_ms <= pair[1].timestamp_ms),
            "creation-order timestamps: {:?}",
            chunks.iter().map(|c| c.timestamp_ms).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_chunk_timestamps_are_monotonic() {
        let db = setup().await;
        db.insert_raw_samples(&accel_samples(400)).await.unwrap();

        let config = ChunkingConfig {
            chunk_size: 30,
            batch_size: 100,
            ..ChunkingConfig::default()
        };
        let aggregator = ChunkAggregator::new(db.clone(), config);
        aggregator.process_session_data(SESSION).await;

        assert_creation_order_monotonic(&db.get_chunks_after(SESSION, -1).await.unwrap());
    }

    #[tokio::test]
    async fn test_mixed_kinds_are_written_in_timestamp_order() {
        let db = setup().await;
        let mut samples = accel_samples(60);
        samples.extend((0..30).map(|i| {
            RawSample::motion(SESSION, SensorKind::Gyroscope, i * 100, [0.0, 0.1, 0.0])
        }));
        db.insert_raw_samples(&samples).await.unwrap();

        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        assert_eq!(aggregator.process_session_data(SESSION).await, 90);

        let chunks = db.get_chunks_after(SESSION, -1).await.unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.timestamp_ms).collect::<Vec<_>>(),
            vec![0, 0, 3_000]
        );
        assert_creation_order_monotonic(&chunks);
    }

    #[tokio::test]
    async fn test_monotonic_across_ticks_with_uneven_rates() {
        let db = setup().await;
        let aggregator = ChunkAggregator::new(
            db.clone(),
            ChunkingConfig {
                chunk_size: 30,
                batch_size: 200,
                ..ChunkingConfig::default()
            },
        );

        // 10 Hz motion, 2 Hz audio, 1 Hz light, delivered in 20 s slices
        for slice in 0..6_i64 {
            let from = slice * 20_000;
            let mut samples = Vec::new();
            for t in (from..from + 20_000).step_by(100) {
                samples.push(RawSample::motion(SESSION, SensorKind::Accelerometer, t, [0.0, 0.0, 0.02]));
                samples.push(RawSample::motion(SESSION, SensorKind::Gyroscope, t, [0.0, 0.01, 0.0]));
            }
            for t in (from..from + 20_000).step_by(500) {
                samples.push(RawSample::audio(SESSION, t, 35.0, 120.0));
            }
            for t in (from..from + 20_000).step_by(1_000) {
                samples.push(RawSample::light(SESSION, t, 2.0));
            }
            db.insert_raw_samples(&samples).await.unwrap();
            aggregator.process_session_data(SESSION).await;
        }
        aggregator.drain_session_data(SESSION).await;

        assert!(!aggregator.needs_processing(SESSION).await.unwrap());
        let chunks = db.get_chunks_after(SESSION, -1).await.unwrap();
        assert_creation_order_monotonic(&chunks);
        let light: usize = chunks.iter().filter_map(|c| c.light).map(|l| l.sample_count).sum();
        let audio: usize = chunks
            .iter()
            .filter_map(|c| c.audio.as_ref())
            .map(|a| a.readings.len())
            .sum();
        assert_eq!((light, audio), (120, 240));
    }

    #[tokio::test]
    async fn test_stalled_kind_does_not_hold_back_others() {
        let db = setup().await;
        // light stops after 10 readings; motion runs on for two minutes
        let mut samples: Vec<RawSample> = (0..10)
            .map(|i| RawSample::light(SESSION, i * 1_000, 3.0))
            .collect();
        samples.extend(
            (0..1_200).map(|i| {
                RawSample::motion(SESSION, SensorKind::Accelerometer, i * 100, [0.0, 0.0, 0.01])
            }),
        );
        db.insert_raw_samples(&samples).await.unwrap();

        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        aggregator.process_session_data(SESSION).await;

        let chunks = db.get_chunks_after(SESSION, -1).await.unwrap();
        assert_creation_order_monotonic(&chunks);
        assert_eq!(chunks.iter().filter(|c| c.light.is_some()).count(), 1);
        assert_eq!(chunks.iter().filter(|c| c.accelerometer.is_some()).count(), 40);
    }

    #[tokio::test]
    async fn test_small_batches_carry_partial_groups_forward() {
        let db = setup().await;
        db.insert_raw_samples(&accel_samples(250)).await.unwrap();

        let config = ChunkingConfig {
            chunk_size: 30,
            batch_size: 100,
            ..ChunkingConfig::default()
        };
        let aggregator = ChunkAggregator::new(db.clone(), config);
        assert_eq!(aggregator.process_session_data(SESSION).await, 240);
        assert_eq!(db.count_chunks(SESSION).await.unwrap(), 8);
        assert_eq!(db.count_unprocessed_samples(SESSION).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_chunk_holds_axis_means_and_first_timestamp() {
        let db = setup().await;
        db.insert_raw_samples(&accel_samples(30)).await.unwrap();

        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        aggregator.process_session_data(SESSION).await;

        let chunks = db.get_chunks_for_session(SESSION).await.unwrap();
        assert_eq!(chunks.len(), 1);
        let summary = chunks[0].accelerometer.expect("accelerometer summary");
        // mean of 0.00..=0.29 in steps of 0.01
        assert_relative_eq!(summary.x, 0.145, epsilon = 1e-9);
        assert_relative_eq!(summary.z, 1.0, epsilon = 1e-9);
        assert_eq!(summary.sample_count, 30);
        assert_eq!(chunks[0].timestamp_ms, 0);
    }

    #[tokio::test]
    async fn test_drain_flushes_trailing_group() {
        let db = setup().await;
        db.insert_raw_samples(&accel_samples(1000)).await.unwrap();

        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        aggregator.process_session_data(SESSION).await;
        let run = aggregator.drain_session_data(SESSION).await;

        assert_eq!(run.processed, 10);
        assert_eq!(run.chunks.len(), 1);
        assert_eq!(run.chunks[0].timestamp_ms, 99_000);
        assert!(!aggregator.needs_processing(SESSION).await.unwrap());
    }

    #[tokio::test]
    async fn test_kinds_are_chunked_independently() {
        let db = setup().await;
        let mut samples = accel_samples(60);
        samples.extend((0..30).map(|i| RawSample::light(SESSION, i * 1000, 5.0)));
        samples.extend((0..30).map(|i| RawSample::audio(SESSION, i * 500, 35.0, 120.0)));
        db.insert_raw_samples(&samples).await.unwrap();

        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        assert_eq!(aggregator.process_session_data(SESSION).await, 120);

        let chunks = db.get_chunks_for_session(SESSION).await.unwrap();
        assert_eq!(chunks.iter().filter(|c| c.accelerometer.is_some()).count(), 2);
        assert_eq!(chunks.iter().filter(|c| c.light.is_some()).count(), 1);
        let audio = chunks
            .iter()
            .find_map(|c| c.audio.as_ref())
            .expect("audio chunk");
        assert_eq!(audio.readings.len(), 30);
        assert_relative_eq!(audio.mean_decibel, 35.0);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_retired_not_counted() {
        let db = setup().await;
        db.insert_raw_samples(&accel_samples(30)).await.unwrap();
        db.execute(|conn| {
            conn.execute(
                "INSERT INTO raw_samples (session_id, sensor_kind, timestamp_ms, v0, v1, v2)
                 VALUES (?1, 'accel', 50, 0.1, NULL, NULL)",
                [SESSION],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        let run = aggregator.drain_session_data(SESSION).await;
        assert_eq!(run.processed, 30);
        assert_eq!(run.malformed, 1);
        assert_eq!(run.chunks.len(), 1);
        assert!(!aggregator.needs_processing(SESSION).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_abandons_batch_and_keeps_backlog() {
        let db = setup().await;
        db.insert_raw_samples(&accel_samples(60)).await.unwrap();
        db.execute(|conn| {
            conn.execute_batch("DROP TABLE sensor_chunks")?;
            Ok(())
        })
        .await
        .unwrap();

        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        let run = aggregator.drain_session_data(SESSION).await;
        assert_eq!(run.processed, 0);
        assert_eq!(run.failed_batches, 1);
        assert_eq!(db.count_unprocessed_samples(SESSION).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_cancelled_run_does_nothing() {
        let db = setup().await;
        db.insert_raw_samples(&accel_samples(60)).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let aggregator = ChunkAggregator::new(db.clone(), ChunkingConfig::default());
        let run = aggregator.process_with_cancel(SESSION, &token).await;
        assert_eq!(run.processed, 0);
        assert_eq!(db.count_unprocessed_samples(SESSION).await.unwrap(), 60);
    }

    fn light_backlog(count: i64, truncated: bool) -> KindBacklog {
        KindBacklog {
            kind: SensorKind::Light,
            rows: (0..count)
                .map(|i| BacklogRow {
                    id: i + 1,
                    sample: Ok(RawSample {
                        id: Some(i + 1),
                        ..RawSample::light(SESSION, i * 1000, 1.0)
                    }),
                })
                .collect(),
            truncated,
        }
    }

    fn rules(flush_tails: bool) -> PlanRules {
        PlanRules {
            chunk_size: 30,
            flush_tails,
            stale_group_ms: 60_000,
        }
    }

    #[test]
    fn test_plan_keeps_partial_group_without_flush() {
        let plan = plan_round(SESSION, vec![light_backlog(35, false)], None, rules(false));
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.processed_ids.len(), 30);

        let plan = plan_round(SESSION, vec![light_backlog(35, false)], None, rules(true));
        assert_eq!(plan.chunks.len(), 2);
        assert_eq!(plan.processed_ids.len(), 35);
    }

    #[test]
    fn test_late_samples_are_stamped_at_watermark() {
        let plan = plan_round(SESSION, vec![light_backlog(30, false)], Some(90_000), rules(false));
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].timestamp_ms, 90_000);
    }

    #[test]
    fn test_negative_audio_peak_is_kept() {
        let group: Vec<RawSample> = [-30.0, -12.5, -20.0]
            .into_iter()
            .enumerate()
            .map(|(i, decibel)| RawSample::audio(SESSION, i as i64 * 500, decibel, 100.0))
            .collect();
        let chunk = summarize_group(SESSION, SensorKind::Audio, &group).unwrap();
        assert_eq!(chunk.audio.unwrap().peak_decibel, -12.5);
    }
}
