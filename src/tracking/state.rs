use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TrackingStatus {
    Idle,
    Tracking,
}

impl Default for TrackingStatus {
    fn default() -> Self {
        TrackingStatus::Idle
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingState {
    pub status: TrackingStatus,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TrackingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tracking(&self) -> bool {
        self.status == TrackingStatus::Tracking
    }

    pub fn begin_session(&mut self, session_id: String, user_id: String, start_at: DateTime<Utc>) {
        *self = Self {
            status: TrackingStatus::Tracking,
            session_id: Some(session_id),
            user_id: Some(user_id),
            started_at: Some(start_at),
        };
    }

    pub fn finish(&mut self) {
        *self = Self::default();
    }
}
