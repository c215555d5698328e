//! Process configuration and the long-lived services built from it.

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use chrono_tz::Tz;

use crate::alarm::{AlarmMonitor, SmartAlarm};
use crate::capture::{CaptureConfig, CaptureController, SensorSource};
use crate::db::Database;
use crate::scoring::SessionEvaluator;
use crate::settings::SettingsStore;
use crate::tracking::TrackingController;

pub const DATA_DIR_VAR: &str = "SLEEPTRACK_DATA_DIR";
pub const TZ_VAR: &str = "SLEEPTRACK_TZ";
pub const DEBUG_VAR: &str = "SLEEPTRACK_DEBUG";

/// `1` or `true` in any case.
pub fn debug_flag(value: Option<&str>) -> bool {
    value
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub time_zone: Tz,
    pub debug: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = lookup(DATA_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("sleeptrack-data"));

        let time_zone = match lookup(TZ_VAR) {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|err| anyhow!("invalid {TZ_VAR} value {name:?}: {err}"))?,
            None => Tz::UTC,
        };

        Ok(Self {
            data_dir,
            time_zone,
            debug: debug_flag(lookup(DEBUG_VAR).as_deref()),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("sleeptrack.sqlite3")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }
}

/// Everything a host application drives: tracking, alarms and settings
/// over one shared database.
pub struct AppState {
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub tracking: TrackingController,
    pub smart_alarm: SmartAlarm,
    pub monitor: AlarmMonitor,
}

impl AppState {
    /// Open storage under `config.data_dir` and wire the services. Sensor
    /// sources come from the host platform.
    pub fn open(config: &AppConfig, sources: Vec<Arc<dyn SensorSource>>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let db = Database::new(config.database_path())?;
        let settings = Arc::new(SettingsStore::new(config.settings_path())?);

        let capture = CaptureController::new(db.clone(), sources, CaptureConfig::default());
        let evaluator = SessionEvaluator::new(db.clone(), settings.clone());
        let tracking = TrackingController::new(db.clone(), capture, evaluator);

        let smart_alarm = SmartAlarm::new(db.clone(), settings.clone(), config.time_zone);
        let monitor = AlarmMonitor::new(smart_alarm.clone(), settings.clone());

        Ok(Self {
            db,
            settings,
            tracking,
            smart_alarm,
            monitor,
        })
    }
}
