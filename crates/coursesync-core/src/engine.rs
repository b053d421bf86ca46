//! The progress engine exposed to the rest of the application.
//!
//! Construct one `ProgressEngine` at startup and share it by reference.
//! Lesson events mutate and persist synchronously, then schedule a debounced
//! sync; teardown and navigation are alternate triggers into the same path.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Config;
use crate::models::{Course, SyncStatus};
use crate::progress::ProgressStore;
use crate::storage::KeyValueStore;
use crate::sync::{
    BeaconTransport, ProgressService, RouteBoundarySync, SyncReport, SyncScheduler, TeardownFlush,
    TeardownReport,
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub debounce: Duration,
    pub classroom_prefix: String,
    pub beacon_url: String,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: config.debounce(),
            classroom_prefix: config.classroom_prefix.clone(),
            beacon_url: config.beacon_url(),
        }
    }
}

pub struct ProgressEngine {
    store: Arc<ProgressStore>,
    scheduler: Arc<SyncScheduler>,
    teardown: TeardownFlush,
    route: RouteBoundarySync,
}

impl ProgressEngine {
    /// Hydrate the progress store from `kv` and wire up the sync triggers.
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        service: Arc<dyn ProgressService>,
        beacon: Arc<dyn BeaconTransport>,
        options: EngineOptions,
    ) -> Self {
        let store = Arc::new(ProgressStore::open(Arc::clone(&kv)));
        let scheduler = Arc::new(SyncScheduler::new(
            Arc::clone(&store),
            service,
            kv,
            options.debounce,
        ));
        let teardown = TeardownFlush::new(Arc::clone(&store), beacon, options.beacon_url);
        let route = RouteBoundarySync::new(Arc::clone(&scheduler), options.classroom_prefix);

        Self {
            store,
            scheduler,
            teardown,
            route,
        }
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    // ===== Lesson events =====

    pub fn mark_complete(&self, course_id: i64, video_id: i64, total_videos: u32) {
        self.store.mark_complete(course_id, video_id);
        self.scheduler
            .schedule_single_course_sync(course_id, total_videos);
    }

    pub fn mark_incomplete(&self, course_id: i64, video_id: i64, total_videos: u32) {
        self.store.mark_incomplete(course_id, video_id);
        self.scheduler
            .schedule_single_course_sync(course_id, total_videos);
    }

    // ===== Queries =====

    pub fn is_completed(&self, course_id: i64, video_id: i64) -> bool {
        self.store.is_completed(course_id, video_id)
    }

    pub fn course_progress(&self, course_id: i64, total_videos: u32) -> u8 {
        self.store.course_progress(course_id, total_videos)
    }

    /// Progress for display, preferring a server value not yet superseded locally.
    pub fn display_progress(&self, course_id: i64, total_videos: u32) -> u8 {
        self.store.display_progress(course_id, total_videos)
    }

    /// Take totals and server progress from courses whose request was issued at `fetched_at`.
    ///
    /// Pass the time from `CatalogClient::fetched_courses`, not the time of the call,
    /// so cached catalog reads do not override newer local progress.
    pub fn apply_courses(&self, courses: &[Course], fetched_at: Instant) {
        self.store.apply_courses(courses, fetched_at);
    }

    pub fn is_syncing(&self) -> bool {
        self.scheduler.is_syncing()
    }

    pub fn status(&self) -> SyncStatus {
        self.scheduler.status()
    }

    // ===== Sync triggers =====

    /// Batch-sync every course now.
    pub async fn sync_now(&self) -> SyncReport {
        self.scheduler.sync_all_pending_courses().await
    }

    /// Fire-and-forget delivery for when the client is shutting down.
    pub fn teardown(&self) -> TeardownReport {
        self.teardown.flush()
    }

    /// Report a navigation; syncs when it leaves the classroom.
    pub async fn on_navigate(&self, path: &str) -> Option<SyncReport> {
        self.route.on_navigate(path).await
    }
}
