use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};

use crate::db::{Database, SessionMetrics, SleepSession};
use crate::error::ValidationError;
use crate::scoring::aggregate::{aggregate_stages, estimated_breakdown};
use crate::scoring::config::ScoringConfig;
use crate::scoring::score::{compute_sleep_score, ScoreInputs};
use crate::settings::{ProfileReader, UserProfile};
use crate::staging::{build_stage_timeline, ClassifierConfig};

/// Turns a completed session's chunks into persisted metrics.
#[derive(Clone)]
pub struct SessionEvaluator {
    db: Database,
    profiles: Arc<dyn ProfileReader>,
    classifier: ClassifierConfig,
    scoring: ScoringConfig,
}

impl SessionEvaluator {
    pub fn new(db: Database, profiles: Arc<dyn ProfileReader>) -> Self {
        Self::with_config(
            db,
            profiles,
            ClassifierConfig::default(),
            ScoringConfig::default(),
        )
    }

    pub fn with_config(
        db: Database,
        profiles: Arc<dyn ProfileReader>,
        classifier: ClassifierConfig,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            db,
            profiles,
            classifier,
            scoring,
        }
    }

    /// Evaluate once and persist. Already evaluated sessions come back as
    /// stored; open sessions and non-positive durations are rejected.
    pub async fn evaluate_session(&self, session_id: &str) -> Result<SleepSession> {
        let mut session = self
            .db
            .get_session(session_id)
            .await?
            .ok_or_else(|| ValidationError::SessionNotFound(session_id.to_string()))?;

        if session.is_evaluated() {
            return Ok(session);
        }
        if session.end_at.is_none() {
            return Err(ValidationError::SessionNotCompleted(session.id).into());
        }
        let duration_min = session.duration_min.unwrap_or(0.0);
        if !duration_min.is_finite() || duration_min <= 0.0 {
            return Err(ValidationError::InvalidDuration {
                session_id: session.id,
                duration_min,
            }
            .into());
        }
        let duration_hours = duration_min / 60.0;

        let breakdown = match self.db.get_chunks_for_session(&session.id).await {
            Ok(chunks) => {
                let timeline = build_stage_timeline(&chunks, &self.classifier);
                aggregate_stages(&timeline, session.start_at, duration_hours, &self.scoring)
            }
            Err(err) => {
                warn!(
                    "Falling back to estimated stages for session {}: {:#}",
                    session.id, err
                );
                estimated_breakdown(duration_hours, &self.scoring)
            }
        };

        let profile = self.profiles.profile(&session.user_id).unwrap_or_else(|err| {
            warn!(
                "Using default profile for user {}: {:#}",
                session.user_id, err
            );
            UserProfile::default()
        });

        let sleep_score = compute_sleep_score(
            &ScoreInputs {
                stages: breakdown.stages,
                awake_count: breakdown.awake_count,
                sleep_latency_min: breakdown.sleep_latency_min,
            },
            &profile,
            &self.scoring,
        )
        .with_context(|| format!("failed to score session {}", session.id))?;

        let metrics = SessionMetrics {
            stages: breakdown.stages,
            stage_source: breakdown.source,
            sleep_score,
            awake_count: breakdown.awake_count,
            sleep_latency_min: breakdown.sleep_latency_min,
        };

        let evaluated_at = Utc::now();
        if !self
            .db
            .save_session_metrics(&session.id, &metrics, evaluated_at)
            .await?
        {
            // evaluated concurrently; the stored result wins
            return self
                .db
                .get_session(&session.id)
                .await?
                .ok_or_else(|| ValidationError::SessionNotFound(session.id.clone()).into());
        }

        info!(
            "Evaluated session {}: score {}, stages {:?} ({})",
            session.id,
            sleep_score,
            metrics.stages,
            metrics.stage_source.as_str()
        );

        session.apply_metrics(&metrics, evaluated_at);
        Ok(session)
    }
}
