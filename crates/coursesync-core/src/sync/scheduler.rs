use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{Debouncer, ProgressService};
use crate::models::{CourseProgress, SyncStatus};
use crate::progress::ProgressStore;
use crate::storage::KeyValueStore;

/// Storage key for the timestamp of the last successful sync
pub const LAST_SYNC_KEY: &str = "progress-last-sync";

/// How a sync attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote service accepted the update
    Sent,
    /// The remote call failed; local state is untouched and the next trigger retries
    Failed(String),
    /// Another sync was in flight, so this request was dropped
    SkippedInFlight,
    /// No course had a reportable percentage
    NothingToSend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    /// Percentages that were sent, or would have been for a skipped attempt
    pub updates: Vec<CourseProgress>,
    pub skipped_without_total: usize,
}

impl SyncReport {
    fn new(outcome: SyncOutcome, updates: Vec<CourseProgress>, skipped_without_total: usize) -> Self {
        Self {
            outcome,
            updates,
            skipped_without_total,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.outcome == SyncOutcome::Sent
    }
}

/// Clears the syncing flag when the in-flight call settles, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pushes local progress to the remote service.
///
/// At most one remote call is in flight at a time. Requests arriving while
/// one is running are dropped rather than queued; the next trigger reads the
/// then-current store, so nothing is lost, only delayed.
pub struct SyncScheduler {
    store: Arc<ProgressStore>,
    service: Arc<dyn ProgressService>,
    kv: Arc<dyn KeyValueStore>,
    debounce: Duration,
    debouncer: Debouncer<i64>,
    syncing: AtomicBool,
    last_synced_at: Mutex<Option<DateTime<Utc>>>,
    last_skipped: AtomicUsize,
}

impl SyncScheduler {
    pub fn new(
        store: Arc<ProgressStore>,
        service: Arc<dyn ProgressService>,
        kv: Arc<dyn KeyValueStore>,
        debounce: Duration,
    ) -> Self {
        let last_synced_at = match kv.load(LAST_SYNC_KEY) {
            Ok(Some(raw)) => DateTime::parse_from_rfc3339(raw.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "Failed to read last sync time");
                None
            }
        };

        Self {
            store,
            service,
            kv,
            debounce,
            debouncer: Debouncer::new(),
            syncing: AtomicBool::new(false),
            last_synced_at: Mutex::new(last_synced_at),
            last_skipped: AtomicUsize::new(0),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            syncing: self.is_syncing(),
            last_synced_at: *self
                .last_synced_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            last_skipped_without_total: self.last_skipped.load(Ordering::Relaxed),
        }
    }

    /// Number of per-course debounce timers still waiting.
    pub fn pending_timers(&self) -> usize {
        self.debouncer.pending()
    }

    /// Drop all waiting debounce timers without syncing.
    pub fn cancel_pending(&self) {
        self.debouncer.cancel_all();
    }

    fn try_begin(&self) -> Option<InFlight<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(&self.syncing))
    }

    fn record_success(&self) {
        let now = Utc::now();
        if let Err(e) = self.kv.store(LAST_SYNC_KEY, &now.to_rfc3339()) {
            debug!(error = %e, "Failed to persist last sync time");
        }
        *self
            .last_synced_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(now);
    }

    /// Schedule a sync of one course once mutation activity pauses.
    ///
    /// Each call restarts the quiescence window for that course. The
    /// percentage is computed when the timer fires, so a burst of mutations
    /// yields one call carrying the final state.
    pub fn schedule_single_course_sync(self: &Arc<Self>, course_id: i64, total_videos: u32) {
        self.store.record_total_videos(course_id, total_videos);

        let scheduler = Arc::clone(self);
        let scheduled = self.debouncer.schedule(course_id, self.debounce, async move {
            let report = scheduler.sync_course(course_id).await;
            debug!(course_id, outcome = ?report.outcome, "Debounced course sync finished");
        });
        if scheduled {
            debug!(course_id, debounce_ms = self.debounce.as_millis() as u64, "Course sync scheduled");
        }
    }

    /// Push the current percentage of one course, unless a sync is already in flight.
    pub async fn sync_course(&self, course_id: i64) -> SyncReport {
        let total = match self.store.total_videos(course_id) {
            Some(total) => total,
            None => {
                debug!(course_id, "No total video count recorded, skipping course sync");
                return SyncReport::new(SyncOutcome::NothingToSend, Vec::new(), 1);
            }
        };

        let update = CourseProgress {
            course_id,
            percent: self.store.course_progress(course_id, total),
        };

        let Some(_in_flight) = self.try_begin() else {
            debug!(course_id, "Sync already in flight, dropping course sync");
            return SyncReport::new(SyncOutcome::SkippedInFlight, vec![update], 0);
        };

        match self.service.update_one(course_id, update.percent).await {
            Ok(()) => {
                info!(course_id, percent = update.percent, "Course progress synced");
                self.record_success();
                SyncReport::new(SyncOutcome::Sent, vec![update], 0)
            }
            Err(e) => {
                warn!(course_id, error = %e, transient = e.is_transient(), "Failed to sync course progress");
                SyncReport::new(SyncOutcome::Failed(e.to_string()), vec![update], 0)
            }
        }
    }

    /// Push every course with a recorded total in one batch call.
    ///
    /// Courses with progress but no recorded total are left out and counted
    /// in `skipped_without_total`.
    pub async fn sync_all_pending_courses(&self) -> SyncReport {
        let Some(_in_flight) = self.try_begin() else {
            debug!("Sync already in flight, dropping batch sync");
            let pending = self.store.pending_progress();
            return SyncReport::new(
                SyncOutcome::SkippedInFlight,
                pending.updates,
                pending.skipped_without_total,
            );
        };

        let pending = self.store.pending_progress();
        self.last_skipped
            .store(pending.skipped_without_total, Ordering::Relaxed);
        if pending.skipped_without_total > 0 {
            debug!(
                skipped = pending.skipped_without_total,
                "Courses without a total video count left out of batch sync"
            );
        }

        if pending.updates.is_empty() {
            return SyncReport::new(
                SyncOutcome::NothingToSend,
                Vec::new(),
                pending.skipped_without_total,
            );
        }

        match self.service.update_many(&pending.updates).await {
            Ok(()) => {
                info!(courses = pending.updates.len(), "Batch progress synced");
                self.record_success();
                SyncReport::new(
                    SyncOutcome::Sent,
                    pending.updates,
                    pending.skipped_without_total,
                )
            }
            Err(e) => {
                warn!(
                    courses = pending.updates.len(),
                    error = %e,
                    transient = e.is_transient(),
                    "Failed to sync batch progress"
                );
                SyncReport::new(
                    SyncOutcome::Failed(e.to_string()),
                    pending.updates,
                    pending.skipped_without_total,
                )
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        One(i64, u8),
        Many(Vec<CourseProgress>),
    }

    /// Records calls; optionally holds each call until a permit is released.
    #[derive(Default)]
    pub(crate) struct FakeService {
        pub calls: Mutex<Vec<Call>>,
        pub fail: AtomicBool,
        gate: Option<Semaphore>,
        in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl FakeService {
        pub fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Default::default()
            }
        }

        pub fn release(&self, permits: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(permits);
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn handle(&self, call: Call) -> Result<(), ApiError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(call);
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(ApiError::ServerError("unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ProgressService for FakeService {
        async fn update_one(&self, course_id: i64, percent: u8) -> Result<(), ApiError> {
            self.handle(Call::One(course_id, percent)).await
        }

        async fn update_many(&self, updates: &[CourseProgress]) -> Result<(), ApiError> {
            self.handle(Call::Many(updates.to_vec())).await
        }
    }

    const DEBOUNCE: Duration = Duration::from_millis(500);

    fn scheduler(service: Arc<FakeService>) -> (Arc<ProgressStore>, Arc<SyncScheduler>, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        let store = Arc::new(ProgressStore::open(kv.clone()));
        let scheduler = Arc::new(SyncScheduler::new(store.clone(), service, kv.clone(), DEBOUNCE));
        (store, scheduler, kv)
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_into_one_call() {
        let service = Arc::new(FakeService::default());
        let (store, scheduler, _) = scheduler(service.clone());

        for video in 1..=3 {
            store.mark_complete(7, video);
            scheduler.schedule_single_course_sync(7, 4);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(service.calls().is_empty());

        tokio::time::sleep(DEBOUNCE).await;
        assert_eq!(service.calls(), vec![Call::One(7, 75)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_drops_concurrent_request() {
        let service = Arc::new(FakeService::gated());
        let (store, scheduler, _) = scheduler(service.clone());
        store.record_total_videos(1, 4);
        store.mark_complete(1, 1);

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.sync_course(1).await }
        });
        tokio::task::yield_now().await;
        assert!(scheduler.is_syncing());

        // Mutation arrives mid-sync; the concurrent request is dropped
        store.mark_complete(1, 2);
        let second = scheduler.sync_all_pending_courses().await;
        assert_eq!(second.outcome, SyncOutcome::SkippedInFlight);

        service.release(1);
        let first = first.await.unwrap();
        assert_eq!(first.outcome, SyncOutcome::Sent);
        assert!(!scheduler.is_syncing());

        // A later trigger observes the latest state
        service.release(1);
        let third = scheduler.sync_course(1).await;
        assert!(third.is_sent());
        assert_eq!(service.calls(), vec![Call::One(1, 25), Call::One(1, 50)]);
        assert_eq!(service.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_local_state_and_clears_flag() {
        let service = Arc::new(FakeService::default());
        service.fail.store(true, Ordering::SeqCst);
        let (store, scheduler, kv) = scheduler(service.clone());
        store.record_total_videos(2, 2);
        store.mark_complete(2, 1);

        let report = scheduler.sync_course(2).await;
        assert!(matches!(report.outcome, SyncOutcome::Failed(_)));
        assert!(!scheduler.is_syncing());
        assert!(store.is_completed(2, 1));
        assert_eq!(kv.load(LAST_SYNC_KEY).unwrap(), None);
        assert_eq!(scheduler.status().last_synced_at, None);

        service.fail.store(false, Ordering::SeqCst);
        let retry = scheduler.sync_course(2).await;
        assert!(retry.is_sent());
        assert!(scheduler.status().last_synced_at.is_some());
        assert!(kv.load(LAST_SYNC_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_batch_sync_skips_courses_without_total() {
        let service = Arc::new(FakeService::default());
        let (store, scheduler, _) = scheduler(service.clone());
        store.record_total_videos(1, 2);
        store.mark_complete(1, 1);
        store.mark_complete(2, 1);

        let report = scheduler.sync_all_pending_courses().await;
        assert!(report.is_sent());
        assert_eq!(report.skipped_without_total, 1);
        assert_eq!(
            service.calls(),
            vec![Call::Many(vec![CourseProgress { course_id: 1, percent: 50 }])]
        );
        assert_eq!(scheduler.status().last_skipped_without_total, 1);
    }

    #[tokio::test]
    async fn test_batch_sync_with_nothing_to_send_makes_no_call() {
        let service = Arc::new(FakeService::default());
        let (store, scheduler, _) = scheduler(service.clone());
        store.mark_complete(3, 1);

        let report = scheduler.sync_all_pending_courses().await;
        assert_eq!(report.outcome, SyncOutcome::NothingToSend);
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_course_sync_without_total_makes_no_call() {
        let service = Arc::new(FakeService::default());
        let (store, scheduler, _) = scheduler(service.clone());
        store.mark_complete(3, 1);

        let report = scheduler.sync_course(3).await;
        assert_eq!(report.outcome, SyncOutcome::NothingToSend);
        assert_eq!(report.skipped_without_total, 1);
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_last_sync_time_restored_from_storage() {
        let kv = Arc::new(MemoryStore::new());
        kv.store(LAST_SYNC_KEY, "2026-03-01T12:00:00+00:00").unwrap();
        let store = Arc::new(ProgressStore::open(kv.clone()));
        let scheduler = SyncScheduler::new(store, Arc::new(FakeService::default()), kv, DEBOUNCE);

        let last = scheduler.status().last_synced_at.expect("last sync not restored");
        assert_eq!(last.to_rfc3339(), "2026-03-01T12:00:00+00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_timers() {
        let service = Arc::new(FakeService::default());
        let (store, scheduler, _) = scheduler(service.clone());
        store.mark_complete(1, 1);
        scheduler.schedule_single_course_sync(1, 2);
        assert_eq!(scheduler.pending_timers(), 1);

        scheduler.cancel_pending();
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(service.calls().is_empty());
    }
}
