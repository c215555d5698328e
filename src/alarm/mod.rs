pub mod config;
pub mod monitor;
pub mod prediction;
pub mod scheduler;
pub mod selector;

pub use config::{AlarmConfig, AlarmPolicy, ResolvedWindow, WakeWindow};
pub use monitor::{AlarmMonitor, FiredAlarms, WakeEvent};
pub use prediction::predicted_timeline;
pub use scheduler::{NotificationScheduler, PlannedAlarm, SmartAlarm};
pub use selector::select_wake_time;
