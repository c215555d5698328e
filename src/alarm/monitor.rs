use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::alarm::config::AlarmConfig;
use crate::alarm::scheduler::SmartAlarm;
use crate::settings::SettingsStore;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Broadcast when an alarm becomes due.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WakeEvent {
    pub alarm_id: String,
    pub user_id: String,
    pub fire_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub gentle_wake: bool,
}

/// Alarms already delivered during this process, keyed by alarm id and the
/// window start they belong to.
#[derive(Debug, Default)]
pub struct FiredAlarms {
    fired: Mutex<HashSet<(String, i64)>>,
}

impl FiredAlarms {
    /// Records the alarm and returns `true` the first time it is seen.
    pub fn mark(&self, alarm_id: &str, instant: DateTime<Utc>) -> bool {
        self.fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((alarm_id.to_string(), instant.timestamp_millis()))
    }

    pub fn contains(&self, alarm_id: &str, instant: DateTime<Utc>) -> bool {
        self.fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(alarm_id.to_string(), instant.timestamp_millis()))
    }
}

#[derive(Clone)]
struct MonitorCore {
    smart: SmartAlarm,
    settings: Arc<SettingsStore>,
    fired: Arc<FiredAlarms>,
    events: broadcast::Sender<WakeEvent>,
}

impl MonitorCore {
    async fn check(&self, now: DateTime<Utc>) -> Vec<WakeEvent> {
        let mut due = Vec::new();
        for (user_id, config) in self.settings.all_alarms() {
            if !config.enabled {
                continue;
            }
            match self.due_event(&user_id, &config, now).await {
                Ok(Some(event)) => due.push(event),
                Ok(None) => {}
                Err(err) => log_warn!("Skipping alarm {} for {}: {:#}", config.id, user_id, err),
            }
        }

        for event in &due {
            log_info!(
                "Alarm {} due for {} at {}",
                event.alarm_id,
                event.user_id,
                event.fire_at
            );
            // no subscribers is fine
            let _ = self.events.send(event.clone());
        }
        due
    }

    async fn due_event(
        &self,
        user_id: &str,
        config: &AlarmConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<WakeEvent>> {
        let tz = self.smart.time_zone();
        let window = config.window.next_after(now, tz)?;
        if now < window.start {
            return Ok(None);
        }
        if !config.fires_on(window.start.with_timezone(&tz).weekday()) {
            return Ok(None);
        }
        if self.fired.contains(&config.id, window.start) {
            return Ok(None);
        }

        // choose as if planning at the window start so the pick stays put
        let planning_now = window.start - Duration::milliseconds(1);
        let fire_at = self.smart.wake_time_in(&window, user_id, planning_now).await;
        if fire_at > now || !self.fired.mark(&config.id, window.start) {
            return Ok(None);
        }

        Ok(Some(WakeEvent {
            alarm_id: config.id.clone(),
            user_id: user_id.to_string(),
            fire_at,
            window_start: window.start,
            gentle_wake: config.gentle_wake,
        }))
    }
}

/// Foreground alarm checker: a periodic tick plus on-demand checks, both
/// deduplicated through one [`FiredAlarms`] set.
pub struct AlarmMonitor {
    core: MonitorCore,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl AlarmMonitor {
    pub fn new(smart: SmartAlarm, settings: Arc<SettingsStore>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            core: MonitorCore {
                smart,
                settings,
                fired: Arc::new(FiredAlarms::default()),
                events,
            },
            handle: None,
            cancel_token: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WakeEvent> {
        self.core.events.subscribe()
    }

    pub fn fired(&self) -> Arc<FiredAlarms> {
        self.core.fired.clone()
    }

    /// One-shot check, e.g. when the app returns to the foreground.
    pub async fn check_now(&self, now: DateTime<Utc>) -> Vec<WakeEvent> {
        self.core.check(now).await
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let core = self.core.clone();
        let period = core.smart.policy().monitor_tick;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        core.check(Utc::now()).await;
                    }
                    _ = token.cancelled() => {
                        log_info!("alarm monitor shutting down");
                        break;
                    }
                }
            }
        });

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle.await.context("alarm monitor task failed to join")
        } else {
            Ok(())
        }
    }
}
