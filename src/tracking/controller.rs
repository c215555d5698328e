use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::capture::CaptureController;
use crate::db::{Database, SleepSession};
use crate::error::ValidationError;
use crate::scoring::SessionEvaluator;

use super::TrackingState;

/// Session lifecycle: opens a session and starts capture, then on stop
/// drains everything captured, closes the session and evaluates it.
#[derive(Clone)]
pub struct TrackingController {
    state: Arc<Mutex<TrackingState>>,
    db: Database,
    capture: Arc<Mutex<CaptureController>>,
    evaluator: SessionEvaluator,
}

impl TrackingController {
    pub fn new(db: Database, capture: CaptureController, evaluator: SessionEvaluator) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackingState::new())),
            db,
            capture: Arc::new(Mutex::new(capture)),
            evaluator,
        }
    }

    pub async fn get_state(&self) -> TrackingState {
        self.state.lock().await.clone()
    }

    pub async fn active_session_for(&self, user_id: &str) -> Result<Option<SleepSession>> {
        self.db.get_active_session(user_id).await
    }

    pub async fn start_tracking(&self, user_id: &str) -> Result<SleepSession> {
        let mut state = self.state.lock().await;
        if let Some(session_id) = state.session_id.as_ref().filter(|_| state.is_tracking()) {
            return Err(ValidationError::TrackingAlreadyActive(session_id.clone()).into());
        }
        if let Some(active) = self.db.get_active_session(user_id).await? {
            return Err(ValidationError::TrackingAlreadyActive(active.id).into());
        }

        let session = SleepSession::start(Uuid::new_v4().to_string(), user_id.to_string(), Utc::now());
        self.db.insert_session(&session).await?;

        if let Err(err) = self.capture.lock().await.start(&session.id).await {
            // nothing was captured, so the row has no reason to exist
            if let Err(cleanup) = self.db.delete_session(&session.id).await {
                warn!("Failed to remove session {} after capture error: {cleanup:#}", session.id);
            }
            return Err(err).context("failed to start capture");
        }

        state.begin_session(session.id.clone(), session.user_id.clone(), session.start_at);
        info!("Tracking started for user {} (session {})", user_id, session.id);
        Ok(session)
    }

    /// Returns the closed session, evaluated when evaluation succeeded.
    /// `Ok(None)` when nothing was being tracked.
    pub async fn stop_tracking(&self) -> Result<Option<SleepSession>> {
        let mut state = self.state.lock().await;
        let Some(session_id) = state.session_id.clone().filter(|_| state.is_tracking()) else {
            return Ok(None);
        };

        {
            let mut capture = self.capture.lock().await;
            if let Err(err) = capture.stop().await {
                warn!("Capture did not stop cleanly for session {session_id}: {err:#}");
            }
            let run = capture.aggregator().drain_session_data(&session_id).await;
            capture.publish_disturbances(&run.chunks);
            info!(
                "Drained {} samples into {} chunks for session {}",
                run.processed,
                run.chunks.len(),
                session_id
            );
        }

        let session = self
            .db
            .complete_session(&session_id, Utc::now(), false)
            .await
            .with_context(|| format!("failed to complete session {session_id}"))?;
        state.finish();

        Ok(Some(self.evaluate_or_keep(session).await))
    }

    /// Close sessions a previous process left open. Each ends at its last
    /// captured sample (or its start when nothing was captured) and is
    /// flagged as interrupted.
    pub async fn recover_incomplete_sessions(&self) -> Result<Vec<SleepSession>> {
        let current = self.state.lock().await.session_id.clone();
        let aggregator = self.capture.lock().await.aggregator().clone();

        let mut recovered = Vec::new();
        for session in self.db.get_active_sessions().await? {
            if current.as_deref() == Some(session.id.as_str()) {
                continue;
            }

            let end_at = match self.db.latest_sample_timestamp(&session.id).await {
                Ok(latest) => latest
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .map_or(session.start_at, |last| last.max(session.start_at)),
                Err(err) => {
                    warn!("No sample timestamp for session {}: {err:#}", session.id);
                    session.start_at
                }
            };

            aggregator.drain_session_data(&session.id).await;
            let closed = match self.db.complete_session(&session.id, end_at, true).await {
                Ok(closed) => closed,
                Err(err) => {
                    warn!("Could not recover session {}: {err:#}", session.id);
                    continue;
                }
            };
            warn!(
                "Recovered incomplete session {}; closed as interrupted at {}",
                closed.id, end_at
            );
            recovered.push(self.evaluate_or_keep(closed).await);
        }
        Ok(recovered)
    }

    async fn evaluate_or_keep(&self, session: SleepSession) -> SleepSession {
        match self.evaluator.evaluate_session(&session.id).await {
            Ok(evaluated) => evaluated,
            Err(err) => {
                warn!("Session {} closed without evaluation: {err:#}", session.id);
                session
            }
        }
    }
}
