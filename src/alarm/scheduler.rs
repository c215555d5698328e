use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::alarm::config::{AlarmConfig, AlarmPolicy, ResolvedWindow};
use crate::alarm::prediction::predicted_timeline;
use crate::alarm::selector::select_wake_time;
use crate::db::Database;
use crate::settings::ProfileReader;
use crate::staging::{build_stage_timeline, ClassifierConfig};

/// One concrete alarm instant produced by planning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAlarm {
    pub alarm_id: String,
    pub user_id: String,
    pub fire_at: DateTime<Utc>,
    pub window: ResolvedWindow,
    pub gentle_wake: bool,
}

/// Hands planned alarms to whatever delivers them (OS notifications, a
/// test double, ...). Delivery itself is out of this crate's hands.
pub trait NotificationScheduler: Send + Sync {
    fn schedule(&self, alarm: &PlannedAlarm) -> Result<()>;
}

/// Picks wake instants from the user's live sleep state.
#[derive(Clone)]
pub struct SmartAlarm {
    db: Database,
    profiles: Arc<dyn ProfileReader>,
    classifier: ClassifierConfig,
    policy: AlarmPolicy,
    tz: Tz,
}

impl SmartAlarm {
    pub fn new(db: Database, profiles: Arc<dyn ProfileReader>, tz: Tz) -> Self {
        Self {
            db,
            profiles,
            classifier: ClassifierConfig::default(),
            policy: AlarmPolicy::default(),
            tz,
        }
    }

    pub fn with_policy(mut self, policy: AlarmPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &AlarmPolicy {
        &self.policy
    }

    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// Best wake instant in the next window that has not yet ended.
    pub async fn compute_optimal_wake_time(
        &self,
        config: &AlarmConfig,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let window = config.window.next_after(now, self.tz)?;
        Ok(self.wake_time_in(&window, user_id, now).await)
    }

    /// Sleep-state aware choice inside one resolved window.
    ///
    /// Not sleeping, or the active session cannot be read: window start.
    /// Sleeping: the observed timeline when the session has classified
    /// chunks, otherwise a predicted one from the session start.
    pub(crate) async fn wake_time_in(
        &self,
        window: &ResolvedWindow,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let session = match self.db.get_active_session(user_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return window.start,
            Err(err) => {
                warn!("Cannot read sleep state for {user_id}, using window start: {err:#}");
                return window.start;
            }
        };

        let observed = match self.db.get_chunks_for_session(&session.id).await {
            Ok(chunks) => build_stage_timeline(&chunks, &self.classifier),
            Err(err) => {
                warn!(
                    "Cannot read chunks for session {}, predicting instead: {err:#}",
                    session.id
                );
                Vec::new()
            }
        };

        let timeline = if observed.is_empty() {
            let goal_hours = self
                .profiles
                .profile(user_id)
                .ok()
                .map(|profile| profile.sleep_goal_hours)
                .filter(|hours| hours.is_finite() && *hours > 0.0)
                .unwrap_or(self.policy.default_sleep_hours);
            let total = Duration::minutes((goal_hours * 60.0).round() as i64);
            debug!(
                "Predicting {} min of sleep for session {}",
                total.num_minutes(),
                session.id
            );
            predicted_timeline(session.start_at, total)
        } else {
            observed
        };

        select_wake_time(window, &timeline, now)
    }

    /// Alarm instants over the look-ahead horizon, in chronological order.
    /// Only the first day consults sleep state; later days use the window
    /// start. Instants more than the past tolerance behind `now` are dropped.
    pub async fn plan(
        &self,
        config: &AlarmConfig,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlannedAlarm>> {
        if !config.enabled {
            return Ok(Vec::new());
        }
        config.window.validate()?;

        let today = now.with_timezone(&self.tz).date_naive();
        let mut planned = Vec::new();

        for offset in 0..self.policy.look_ahead_days {
            let Some(date) = today.checked_add_days(chrono::Days::new(u64::from(offset))) else {
                break;
            };
            if !config.fires_on(date.weekday()) {
                continue;
            }

            let window = config.window.resolve(date, self.tz)?;
            let fire_at = if offset == 0 {
                self.wake_time_in(&window, user_id, now).await
            } else {
                window.start
            };

            if fire_at < now - self.policy.past_tolerance {
                debug!("Skipping alarm {} at {fire_at}: already past", config.id);
                continue;
            }

            planned.push(PlannedAlarm {
                alarm_id: config.id.clone(),
                user_id: user_id.to_string(),
                fire_at,
                window,
                gentle_wake: config.gentle_wake,
            });
        }

        Ok(planned)
    }

    /// Plan and hand every instant to `scheduler`. A failed hand-off is
    /// logged and does not stop the rest. Returns how many were accepted.
    pub async fn schedule(
        &self,
        config: &AlarmConfig,
        user_id: &str,
        now: DateTime<Utc>,
        scheduler: &dyn NotificationScheduler,
    ) -> Result<usize> {
        let planned = self.plan(config, user_id, now).await?;
        let mut accepted = 0;
        for alarm in &planned {
            match scheduler.schedule(alarm) {
                Ok(()) => accepted += 1,
                Err(err) => warn!(
                    "Failed to schedule alarm {} at {}: {err:#}",
                    alarm.alarm_id, alarm.fire_at
                ),
            }
        }
        info!(
            "Scheduled {accepted}/{} instants for alarm {}",
            planned.len(),
            config.id
        );
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::config::WakeWindow;
    use crate::db::{AxisSummary, SensorChunk, SleepSession};
    use crate::settings::UserProfile;
    use anyhow::bail;
    use chrono::{NaiveTime, TimeZone, Weekday};
    use std::sync::Mutex;

    struct FixedProfile(UserProfile);

    impl ProfileReader for FixedProfile {
        fn profile(&self, _user_id: &str) -> Result<UserProfile> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        seen: Mutex<Vec<PlannedAlarm>>,
        reject_first: bool,
    }

    impl NotificationScheduler for RecordingScheduler {
        fn schedule(&self, alarm: &PlannedAlarm) -> Result<()> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(alarm.clone());
            if self.reject_first && seen.len() == 1 {
                bail!("notification quota exceeded");
            }
            Ok(())
        }
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, h, m, 0).unwrap()
    }

    fn alarm(days: Vec<Weekday>) -> AlarmConfig {
        AlarmConfig {
            id: "a1".into(),
            window: WakeWindow {
                start: NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
                end: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            },
            days_of_week: days,
            gentle_wake: true,
            enabled: true,
        }
    }

    fn smart_alarm(db: &Database) -> SmartAlarm {
        SmartAlarm::new(
            db.clone(),
            Arc::new(FixedProfile(UserProfile::default())),
            Tz::UTC,
        )
    }

    fn accel_chunk(session: &str, at: DateTime<Utc>, x: f64) -> SensorChunk {
        let mut chunk = SensorChunk::empty(session, at.timestamp_millis());
        chunk.accelerometer = Some(AxisSummary {
            x,
            y: 0.0,
            z: 0.0,
            sample_count: 30,
        });
        chunk
    }

    async fn store_chunks(db: &Database, chunks: Vec<SensorChunk>) {
        db.execute(move |conn| {
            for chunk in &chunks {
                crate::db::insert_chunk(conn, chunk)?;
            }
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_not_sleeping_uses_window_start() {
        let db = Database::open_in_memory().unwrap();
        let wake = smart_alarm(&db)
            .compute_optimal_wake_time(&alarm(Vec::new()), "u1", at(4, 22, 0))
            .await
            .unwrap();
        assert_eq!(wake, at(5, 6, 30));
    }

    #[tokio::test]
    async fn test_live_light_instant_is_chosen() {
        let db = Database::open_in_memory().unwrap();
        db.insert_session(&SleepSession::start("s1".into(), "u1".into(), at(4, 22, 0)))
            .await
            .unwrap();

        // deep until 06:45, then light movement
        let mut chunks: Vec<SensorChunk> = (0..10)
            .map(|i| accel_chunk("s1", at(5, 6, 30) + Duration::minutes(i), 0.0))
            .collect();
        chunks.extend((0..10).map(|i| accel_chunk("s1", at(5, 6, 45) + Duration::minutes(i), 1.0)));
        store_chunks(&db, chunks).await;

        let wake = smart_alarm(&db)
            .compute_optimal_wake_time(&alarm(Vec::new()), "u1", at(5, 6, 0))
            .await
            .unwrap();
        assert_eq!(wake, at(5, 6, 45));
    }

    #[tokio::test]
    async fn test_live_without_light_uses_window_start() {
        let db = Database::open_in_memory().unwrap();
        db.insert_session(&SleepSession::start("s1".into(), "u1".into(), at(4, 22, 0)))
            .await
            .unwrap();
        let chunks = (0..30)
            .map(|i| accel_chunk("s1", at(5, 6, 30) + Duration::minutes(i), 0.0))
            .collect();
        store_chunks(&db, chunks).await;

        let wake = smart_alarm(&db)
            .compute_optimal_wake_time(&alarm(Vec::new()), "u1", at(5, 6, 0))
            .await
            .unwrap();
        assert_eq!(wake, at(5, 6, 30));
    }

    #[tokio::test]
    async fn test_sleeping_without_chunks_uses_prediction() {
        let db = Database::open_in_memory().unwrap();
        // asleep since 23:20: REM until 06:49, light from 06:50
        db.insert_session(&SleepSession::start("s1".into(), "u1".into(), at(4, 23, 20)))
            .await
            .unwrap();

        let wake = smart_alarm(&db)
            .compute_optimal_wake_time(&alarm(Vec::new()), "u1", at(5, 6, 0))
            .await
            .unwrap();
        assert_eq!(wake, at(5, 6, 50));
    }

    #[tokio::test]
    async fn test_prediction_ending_before_window_uses_start() {
        let db = Database::open_in_memory().unwrap();
        // eight predicted hours end at 06:29
        db.insert_session(&SleepSession::start("s1".into(), "u1".into(), at(4, 22, 30)))
            .await
            .unwrap();

        let wake = smart_alarm(&db)
            .compute_optimal_wake_time(&alarm(Vec::new()), "u1", at(5, 6, 0))
            .await
            .unwrap();
        assert_eq!(wake, at(5, 6, 30));
    }

    #[tokio::test]
    async fn test_plan_covers_look_ahead_and_weekdays() {
        let db = Database::open_in_memory().unwrap();
        let smart = smart_alarm(&db);

        // Monday 2024-03-04 at 05:00
        let every_day = smart.plan(&alarm(Vec::new()), "u1", at(4, 5, 0)).await.unwrap();
        assert_eq!(every_day.len(), 14);
        assert_eq!(every_day[0].fire_at, at(4, 6, 30));
        assert!(every_day.windows(2).all(|w| w[0].fire_at < w[1].fire_at));

        let mondays = smart
            .plan(&alarm(vec![Weekday::Mon]), "u1", at(4, 5, 0))
            .await
            .unwrap();
        assert_eq!(mondays.len(), 2);
        assert_eq!(mondays[1].fire_at, at(11, 6, 30));
    }

    #[tokio::test]
    async fn test_plan_skips_past_instants_with_tolerance() {
        let db = Database::open_in_memory().unwrap();
        let smart = smart_alarm(&db);

        let just_missed = smart
            .plan(&alarm(Vec::new()), "u1", at(4, 6, 30) + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(just_missed[0].fire_at, at(4, 6, 30));

        let long_gone = smart
            .plan(&alarm(Vec::new()), "u1", at(4, 6, 40))
            .await
            .unwrap();
        assert_eq!(long_gone.len(), 13);
        assert_eq!(long_gone[0].fire_at, at(5, 6, 30));
    }

    #[tokio::test]
    async fn test_disabled_alarm_plans_nothing() {
        let db = Database::open_in_memory().unwrap();
        let mut config = alarm(Vec::new());
        config.enabled = false;
        let planned = smart_alarm(&db).plan(&config, "u1", at(4, 5, 0)).await.unwrap();
        assert!(planned.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_continues_after_rejection() {
        let db = Database::open_in_memory().unwrap();
        let scheduler = RecordingScheduler {
            reject_first: true,
            ..RecordingScheduler::default()
        };
        let accepted = smart_alarm(&db)
            .schedule(&alarm(Vec::new()), "u1", at(4, 5, 0), &scheduler)
            .await
            .unwrap();
        assert_eq!(accepted, 13);
        assert_eq!(scheduler.seen.lock().unwrap().len(), 14);
    }
}
