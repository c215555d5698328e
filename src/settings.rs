use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use crate::alarm::AlarmConfig;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaffeineHabit {
    #[default]
    None,
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub sleep_goal_hours: f64,
    pub caffeine_habit: CaffeineHabit,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            sleep_goal_hours: 8.0,
            caffeine_habit: CaffeineHabit::None,
        }
    }
}

impl UserProfile {
    pub fn validate(&self) -> Result<()> {
        if !self.sleep_goal_hours.is_finite() || self.sleep_goal_hours <= 0.0 {
            return Err(ValidationError::InvalidSleepGoal(self.sleep_goal_hours).into());
        }
        Ok(())
    }
}

/// Read access to per-user profiles, injected into scoring and the alarm.
pub trait ProfileReader: Send + Sync {
    /// Profile for `user_id`; users who never saved one get the default.
    fn profile(&self, user_id: &str) -> Result<UserProfile>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UserSettings {
    profiles: HashMap<String, UserProfile>,
    alarms: HashMap<String, Vec<AlarmConfig>>,
}

/// Profiles and alarm configs persisted as one pretty-printed JSON file.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unreadable settings at {}: {}",
                    path.display(),
                    err
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn update_profile(&self, user_id: &str, profile: UserProfile) -> Result<()> {
        profile.validate()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.profiles.insert(user_id.to_string(), profile);
        self.persist(&guard)
    }

    pub fn alarms(&self, user_id: &str) -> Vec<AlarmConfig> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .alarms
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every stored alarm with its owner.
    pub fn all_alarms(&self) -> Vec<(String, AlarmConfig)> {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let mut alarms: Vec<(String, AlarmConfig)> = guard
            .alarms
            .iter()
            .flat_map(|(user_id, configs)| {
                configs
                    .iter()
                    .map(move |config| (user_id.clone(), config.clone()))
            })
            .collect();
        alarms.sort_by(|a, b| (&a.0, &a.1.id).cmp(&(&b.0, &b.1.id)));
        alarms
    }

    /// Insert or replace an alarm by id. Empty wake windows are rejected.
    pub fn upsert_alarm(&self, user_id: &str, alarm: AlarmConfig) -> Result<()> {
        alarm.window.validate()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let alarms = guard.alarms.entry(user_id.to_string()).or_default();
        match alarms.iter_mut().find(|existing| existing.id == alarm.id) {
            Some(existing) => *existing = alarm,
            None => alarms.push(alarm),
        }
        self.persist(&guard)
    }

    pub fn remove_alarm(&self, user_id: &str, alarm_id: &str) -> Result<bool> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let removed = match guard.alarms.get_mut(user_id) {
            Some(alarms) => {
                let before = alarms.len();
                alarms.retain(|alarm| alarm.id != alarm_id);
                alarms.len() != before
            }
            None => false,
        };
        if removed {
            self.persist(&guard)?;
        }
        Ok(removed)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

impl ProfileReader for SettingsStore {
    fn profile(&self, user_id: &str) -> Result<UserProfile> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .profiles
            .get(user_id)
            .copied()
            .unwrap_or_default())
    }
}
