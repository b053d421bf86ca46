use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use super::{SyncReport, SyncScheduler};

/// Triggers a batch sync when navigation leaves the classroom.
pub struct RouteBoundarySync {
    scheduler: Arc<SyncScheduler>,
    classroom_prefix: String,
    previous: Mutex<Option<String>>,
}

impl RouteBoundarySync {
    pub fn new(scheduler: Arc<SyncScheduler>, classroom_prefix: impl Into<String>) -> Self {
        let prefix: String = classroom_prefix.into();
        Self {
            scheduler,
            classroom_prefix: prefix.trim_end_matches('/').to_string(),
            previous: Mutex::new(None),
        }
    }

    /// Whether `path` is the classroom root or below it.
    pub fn is_classroom(&self, path: &str) -> bool {
        match path.strip_prefix(&self.classroom_prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
            None => false,
        }
    }

    /// Record a navigation to `path`, syncing if it crosses out of the classroom.
    pub async fn on_navigate(&self, path: &str) -> Option<SyncReport> {
        let left_classroom = {
            let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
            let was_inside = previous
                .as_deref()
                .map(|p| self.is_classroom(p))
                .unwrap_or(false);
            *previous = Some(path.to_string());
            was_inside && !self.is_classroom(path)
        };

        if !left_classroom {
            return None;
        }
        info!(to = path, "Leaving classroom, syncing progress");
        Some(self.scheduler.sync_all_pending_courses().await)
    }
}
