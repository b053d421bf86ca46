use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::{Course, CourseProgress};
use crate::storage::{KeyValueStore, StorageError};

/// Storage key for the completion map
pub const PROGRESS_KEY: &str = "course-progress";

/// Storage key for the per-course video totals
pub const TOTALS_KEY: &str = "course-video-totals";

/// courseId -> (videoId -> completed)
pub type ProgressMap = BTreeMap<i64, BTreeMap<i64, bool>>;

/// Rounded completion percent, `0` when `total_videos` is zero.
///
/// Rounds half up and never exceeds 100, even if more videos are marked
/// complete than the current total.
pub fn percent_of(completed: usize, total_videos: u32) -> u8 {
    if total_videos == 0 {
        return 0;
    }
    let completed = completed as u64;
    let total = u64::from(total_videos);
    let percent = (200 * completed + total) / (2 * total);
    percent.min(100) as u8
}

/// Percentages ready to send, plus the courses that could not be reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingProgress {
    pub updates: Vec<CourseProgress>,
    /// Courses with progress entries but no recorded total video count
    pub skipped_without_total: usize,
}

#[derive(Debug, Default)]
struct ProgressState {
    progress: ProgressMap,
    totals: BTreeMap<i64, u32>,
    server_overrides: HashMap<i64, u8>,
    /// When each course was last changed locally; server values fetched earlier are stale
    mutated_at: HashMap<i64, Instant>,
}

impl ProgressState {
    fn completed_count(&self, course_id: i64) -> usize {
        self.progress
            .get(&course_id)
            .map(|lessons| lessons.values().filter(|&&done| done).count())
            .unwrap_or(0)
    }
}

pub struct ProgressStore {
    kv: Arc<dyn KeyValueStore>,
    state: Mutex<ProgressState>,
}

impl ProgressStore {
    /// Create an empty store. Call `initialize` to hydrate it from persistence.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            state: Mutex::new(ProgressState::default()),
        }
    }

    /// Create a store and hydrate it in one step.
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Self {
        let store = Self::new(kv);
        store.initialize();
        store
    }

    /// Load persisted progress and totals. Missing or corrupt data yields empty state.
    pub fn initialize(&self) {
        let progress: ProgressMap = self.load_or_default(PROGRESS_KEY);
        let totals: BTreeMap<i64, u32> = self.load_or_default(TOTALS_KEY);
        debug!(
            courses = progress.len(),
            totals = totals.len(),
            "Progress store initialized"
        );

        let mut state = self.lock();
        state.progress = progress;
        state.totals = totals;
    }

    fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.kv.load(key) {
            Ok(Some(contents)) => match serde_json::from_str(&contents) {
                Ok(value) => value,
                Err(e) => {
                    warn!(key, error = %e, "Persisted progress is corrupt, starting empty");
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(e) => {
                warn!(key, error = %e, "Failed to read persisted progress, starting empty");
                T::default()
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `value` under `key`, logging rather than failing.
    /// Called with the state lock held so writes are never interleaved.
    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(StorageError::from)
            .and_then(|json| self.kv.store(key, &json));
        if let Err(e) = result {
            warn!(key, error = %e, "Failed to persist progress");
        }
    }

    // ===== Mutators =====

    pub fn mark_complete(&self, course_id: i64, video_id: i64) {
        self.set_completed(course_id, video_id, true);
    }

    pub fn mark_incomplete(&self, course_id: i64, video_id: i64) {
        self.set_completed(course_id, video_id, false);
    }

    fn set_completed(&self, course_id: i64, video_id: i64, completed: bool) {
        let mut state = self.lock();
        state
            .progress
            .entry(course_id)
            .or_default()
            .insert(video_id, completed);
        // A local change supersedes whatever the server last reported
        state.server_overrides.remove(&course_id);
        state.mutated_at.insert(course_id, Instant::now());
        self.persist(PROGRESS_KEY, &state.progress);
        debug!(course_id, video_id, completed, "Lesson progress updated");
    }

    /// Remember the denominator for a course. Zero is ignored since it carries no information.
    pub fn record_total_videos(&self, course_id: i64, total_videos: u32) {
        if total_videos == 0 {
            return;
        }
        let mut state = self.lock();
        if state.totals.get(&course_id) == Some(&total_videos) {
            return;
        }
        state.totals.insert(course_id, total_videos);
        self.persist(TOTALS_KEY, &state.totals);
    }

    /// Set or clear the server-reported percent for a course.
    ///
    /// `fetched_at` is when the request carrying `percent` was issued. A value
    /// fetched no later than the course's last local mutation is ignored, so a
    /// cached catalog cannot bring back an override the user already superseded.
    pub fn apply_server_progress(&self, course_id: i64, percent: Option<u8>, fetched_at: Instant) {
        let mut state = self.lock();
        if state
            .mutated_at
            .get(&course_id)
            .is_some_and(|&mutated| mutated >= fetched_at)
        {
            debug!(course_id, "Ignoring server progress older than local changes");
            return;
        }
        match percent {
            Some(p) => {
                state.server_overrides.insert(course_id, p.min(100));
            }
            None => {
                state.server_overrides.remove(&course_id);
            }
        }
    }

    /// Record totals and server overrides from a catalog fetch issued at `fetched_at`.
    pub fn apply_courses(&self, courses: &[Course], fetched_at: Instant) {
        for course in courses {
            if let Some(total) = course.known_total_videos() {
                self.record_total_videos(course.id, total);
            }
            self.apply_server_progress(course.id, course.server_progress, fetched_at);
        }
    }

    // ===== Queries =====

    pub fn is_completed(&self, course_id: i64, video_id: i64) -> bool {
        self.lock()
            .progress
            .get(&course_id)
            .and_then(|lessons| lessons.get(&video_id))
            .copied()
            .unwrap_or(false)
    }

    pub fn completed_count(&self, course_id: i64) -> usize {
        self.lock().completed_count(course_id)
    }

    /// Locally derived percent for a course.
    pub fn course_progress(&self, course_id: i64, total_videos: u32) -> u8 {
        percent_of(self.completed_count(course_id), total_videos)
    }

    /// Percent to show in the UI: the server value when one is pending, else the local one.
    pub fn display_progress(&self, course_id: i64, total_videos: u32) -> u8 {
        let state = self.lock();
        match state.server_overrides.get(&course_id) {
            Some(&percent) => percent,
            None => percent_of(state.completed_count(course_id), total_videos),
        }
    }

    pub fn server_progress(&self, course_id: i64) -> Option<u8> {
        self.lock().server_overrides.get(&course_id).copied()
    }

    pub fn total_videos(&self, course_id: i64) -> Option<u32> {
        self.lock().totals.get(&course_id).copied()
    }

    /// Every course with at least one progress entry.
    pub fn course_ids(&self) -> Vec<i64> {
        self.lock().progress.keys().copied().collect()
    }

    /// Current percent for every tracked course that has a recorded total.
    pub fn pending_progress(&self) -> PendingProgress {
        let state = self.lock();
        let mut pending = PendingProgress::default();
        for &course_id in state.progress.keys() {
            match state.totals.get(&course_id) {
                Some(&total) => pending.updates.push(CourseProgress {
                    course_id,
                    percent: percent_of(state.completed_count(course_id), total),
                }),
                None => pending.skipped_without_total += 1,
            }
        }
        pending
    }

    /// Copy of the full completion map.
    pub fn snapshot(&self) -> ProgressMap {
        self.lock().progress.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
