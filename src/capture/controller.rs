use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::buffer::{SampleBuffer, SampleSink};
use crate::capture::loop_worker::{capture_loop, flush_buffer, publish_disturbances, CaptureContext};
use crate::capture::source::SensorSource;
use crate::chunking::{ChunkAggregator, ChunkingConfig};
use crate::db::{Database, SensorChunk, SensorKind};
use crate::disturbance::{DisturbanceConfig, DisturbanceEvent};

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How often buffered samples are persisted and chunked.
    pub flush_interval: Duration,
    /// Time budget for one tick. Buffered samples are always persisted;
    /// chunking stops between transactions once the budget is spent.
    pub flush_timeout: Duration,
    pub chunking: ChunkingConfig,
    pub disturbance: DisturbanceConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(10),
            chunking: ChunkingConfig::default(),
            disturbance: DisturbanceConfig::default(),
        }
    }
}

/// Owns the sensor sources and the capture loop for one session at a time.
pub struct CaptureController {
    sources: Vec<Arc<dyn SensorSource>>,
    config: CaptureConfig,
    db: Database,
    aggregator: ChunkAggregator,
    events: broadcast::Sender<DisturbanceEvent>,
    context: Option<CaptureContext>,
    started: Vec<Arc<dyn SensorSource>>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl CaptureController {
    /// Keeps only the sources that report themselves available.
    pub fn new(db: Database, sources: Vec<Arc<dyn SensorSource>>, config: CaptureConfig) -> Self {
        let sources: Vec<Arc<dyn SensorSource>> = sources
            .into_iter()
            .filter(|source| {
                let available = source.is_available();
                if !available {
                    info!("{} sensor unavailable, capturing without it", source.kind());
                }
                available
            })
            .collect();

        let (events, _) = broadcast::channel(64);
        Self {
            aggregator: ChunkAggregator::new(db.clone(), config.chunking.clone()),
            sources,
            config,
            db,
            events,
            context: None,
            started: Vec::new(),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn available_kinds(&self) -> Vec<SensorKind> {
        self.sources.iter().map(|source| source.kind()).collect()
    }

    pub fn aggregator(&self) -> &ChunkAggregator {
        &self.aggregator
    }

    pub fn subscribe_disturbances(&self) -> broadcast::Receiver<DisturbanceEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start every available source and the flush loop. A source that fails
    /// to start is logged and left out; the others keep going.
    pub async fn start(&mut self, session_id: &str) -> Result<()> {
        if self.handle.is_some() {
            bail!("capture already active");
        }
        if let Some(stale) = self.context.take() {
            let dropped = stale.buffer.len();
            if dropped > 0 {
                warn!(
                    "Dropping {dropped} samples of session {} that were never persisted",
                    stale.session_id
                );
            }
        }

        let buffer = SampleBuffer::new();
        let sink = SampleSink::new(session_id, buffer.clone());

        for source in &self.sources {
            match source.start(sink.clone()) {
                Ok(()) => self.started.push(source.clone()),
                Err(err) => warn!("{} sensor failed to start: {err:#}", source.kind()),
            }
        }
        info!(
            "Capture started for session {} with {}/{} sensors",
            session_id,
            self.started.len(),
            self.sources.len()
        );

        let ctx = CaptureContext {
            session_id: session_id.to_string(),
            db: self.db.clone(),
            buffer,
            aggregator: self.aggregator.clone(),
            disturbance: self.config.disturbance.clone(),
            events: self.events.clone(),
        };

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(capture_loop(
            ctx.clone(),
            self.config.flush_interval,
            self.config.flush_timeout,
            cancel_token.clone(),
        ));

        self.context = Some(ctx);
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Stop the sources, end the loop and persist whatever is still
    /// buffered. Calling it when nothing was started does nothing.
    ///
    /// The final flush is retried once. If it still fails the samples stay
    /// buffered and a later `stop` tries again; `start` discards them.
    pub async fn stop(&mut self) -> Result<()> {
        for source in self.started.drain(..) {
            if let Err(err) = source.stop() {
                warn!("{} sensor failed to stop: {err:#}", source.kind());
            }
        }

        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle.await.context("capture loop task failed to join")?;
        }

        let Some(ctx) = self.context.take() else {
            return Ok(());
        };

        let flushed = match flush_buffer(&ctx).await {
            Ok(stored) => Ok(stored),
            Err(err) => {
                warn!("Final flush for session {} failed, retrying: {err:#}", ctx.session_id);
                flush_buffer(&ctx).await
            }
        };
        match flushed {
            Ok(stored) => {
                if stored > 0 {
                    info!("Flushed {stored} buffered samples for session {}", ctx.session_id);
                }
                Ok(())
            }
            Err(err) => {
                warn!(
                    "{} samples for session {} are still buffered after a failed flush",
                    ctx.buffer.len(),
                    ctx.session_id
                );
                self.context = Some(ctx);
                Err(err)
            }
        }
    }

    /// Report disturbances for chunks produced outside the loop, such as the
    /// final drain of a session.
    pub fn publish_disturbances(&self, chunks: &[SensorChunk]) -> usize {
        publish_disturbances(&self.config.disturbance, &self.events, chunks)
    }
}
