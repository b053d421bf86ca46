use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Completion percent for one course, as sent to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub course_id: i64,
    pub percent: u8,
}

/// Body of the batch update endpoint and of the teardown beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgressUpdate {
    pub updates: Vec<CourseProgress>,
}

/// Snapshot of the sync state for UI feedback (spinner, "last synced" label).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub syncing: bool,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_skipped_without_total: usize,
}
