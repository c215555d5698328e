use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::capture::buffer::SampleBuffer;
use crate::chunking::ChunkAggregator;
use crate::db::{Database, SensorChunk};
use crate::disturbance::{detect, DisturbanceConfig, DisturbanceEvent};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Everything one capture tick needs, cloned into the loop task.
#[derive(Clone)]
pub(crate) struct CaptureContext {
    pub session_id: String,
    pub db: Database,
    pub buffer: SampleBuffer,
    pub aggregator: ChunkAggregator,
    pub disturbance: DisturbanceConfig,
    pub events: broadcast::Sender<DisturbanceEvent>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TickReport {
    pub stored: usize,
    pub chunked: usize,
    pub disturbances: usize,
}

pub(crate) async fn capture_loop(
    ctx: CaptureContext,
    flush_interval: Duration,
    flush_timeout: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = run_tick(&ctx, flush_timeout, &cancel_token).await {
                    log_error!("capture tick failed for session {}: {err:?}", ctx.session_id);
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("capture loop shutting down");
                break;
            }
        }
    }
}

/// Move buffered samples into the store. On failure they go back to the
/// head of the buffer for the next attempt.
pub(crate) async fn flush_buffer(ctx: &CaptureContext) -> Result<usize> {
    let samples = ctx.buffer.drain();
    if samples.is_empty() {
        return Ok(0);
    }

    match ctx.db.insert_raw_samples(&samples).await {
        Ok(stored) => Ok(stored),
        Err(err) => {
            ctx.buffer.requeue(samples);
            Err(err).context("failed to persist buffered samples")
        }
    }
}

pub(crate) fn publish_disturbances(
    config: &DisturbanceConfig,
    events: &broadcast::Sender<DisturbanceEvent>,
    chunks: &[SensorChunk],
) -> usize {
    let mut published = 0;
    for chunk in chunks {
        for event in detect(chunk, config) {
            log_info!(
                "{:?} disturbance ({:?}) in session {} at {}: {:.1}",
                event.kind,
                event.severity,
                event.session_id,
                event.timestamp_ms,
                event.value
            );
            // nobody listening is fine
            let _ = events.send(event);
            published += 1;
        }
    }
    published
}

/// Persist the buffer, then chunk for whatever is left of `budget`. The store
/// write always completes; chunking stops between transactions once the budget
/// runs out, and the rest waits for the next tick.
pub(crate) async fn run_tick(
    ctx: &CaptureContext,
    budget: Duration,
    cancel_token: &CancellationToken,
) -> Result<TickReport> {
    let tick_start = Instant::now();

    let stored = flush_buffer(ctx).await?;

    let chunk_budget = cancel_token.child_token();
    let remaining = budget.saturating_sub(tick_start.elapsed());
    let expiry = if remaining.is_zero() {
        chunk_budget.cancel();
        None
    } else {
        let token = chunk_budget.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            token.cancel();
        }))
    };

    let run = ctx
        .aggregator
        .process_with_cancel(&ctx.session_id, &chunk_budget)
        .await;
    if let Some(expiry) = expiry {
        expiry.abort();
    }
    if chunk_budget.is_cancelled() && !cancel_token.is_cancelled() {
        log_warn!(
            "capture tick over budget (> {}ms) for session {}; chunking resumes next tick",
            budget.as_millis(),
            ctx.session_id
        );
    }

    // chunks are committed by now, so their events always go out
    let disturbances = publish_disturbances(&ctx.disturbance, &ctx.events, &run.chunks);

    if stored > 0 || run.processed > 0 {
        log_info!(
            "Capture tick for session {}: stored {} samples, chunked {}, {} disturbances in {}ms",
            ctx.session_id,
            stored,
            run.processed,
            disturbances,
            tick_start.elapsed().as_millis()
        );
    }

    Ok(TickReport {
        stored,
        chunked: run.processed,
        disturbances,
    })
}
