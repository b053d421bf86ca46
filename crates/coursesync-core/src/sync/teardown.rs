use std::sync::Arc;

use reqwest::header;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::models::BatchProgressUpdate;
use crate::progress::ProgressStore;

/// Best-effort, unawaited dispatch that must outlive the caller.
pub trait BeaconTransport: Send + Sync {
    /// Hand `payload` off for delivery to `url`.
    ///
    /// Returns whether the dispatch was accepted, not whether it arrived.
    fn send(&self, url: &str, payload: Vec<u8>) -> bool;
}

/// Posts the payload on a detached task of the current tokio runtime.
#[derive(Clone)]
pub struct HttpBeacon {
    client: reqwest::Client,
}

impl HttpBeacon {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl BeaconTransport for HttpBeacon {
    fn send(&self, url: &str, payload: Vec<u8>) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            return false;
        };
        let client = self.client.clone();
        let url = url.to_string();
        runtime.spawn(async move {
            let result = client
                .post(&url)
                .header(header::CONTENT_TYPE, "application/json")
                .body(payload)
                .send()
                .await;
            // Nobody is left to act on the result
            if let Err(e) = result {
                debug!(url = %url, error = %e, "Beacon delivery failed");
            }
        });
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub dispatched: bool,
    pub courses: usize,
    pub skipped_without_total: usize,
}

/// Last-chance delivery of all pending progress when the client goes away.
///
/// Does not touch the sync state and never waits for a response.
pub struct TeardownFlush {
    store: Arc<ProgressStore>,
    transport: Arc<dyn BeaconTransport>,
    url: String,
}

impl TeardownFlush {
    pub fn new(store: Arc<ProgressStore>, transport: Arc<dyn BeaconTransport>, url: String) -> Self {
        Self {
            store,
            transport,
            url,
        }
    }

    pub fn flush(&self) -> TeardownReport {
        let pending = self.store.pending_progress();
        let mut report = TeardownReport {
            dispatched: false,
            courses: pending.updates.len(),
            skipped_without_total: pending.skipped_without_total,
        };
        if pending.updates.is_empty() {
            return report;
        }

        let body = BatchProgressUpdate {
            updates: pending.updates,
        };
        let payload = match serde_json::to_vec(&body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode teardown payload");
                return report;
            }
        };

        report.dispatched = self.transport.send(&self.url, payload);
        info!(
            courses = report.courses,
            dispatched = report.dispatched,
            "Teardown progress flush"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CourseProgress;
    use crate::storage::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBeacon {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl BeaconTransport for RecordingBeacon {
        fn send(&self, url: &str, payload: Vec<u8>) -> bool {
            self.sent.lock().unwrap().push((url.to_string(), payload));
            true
        }
    }

    fn flush_with(store: Arc<ProgressStore>) -> (Arc<RecordingBeacon>, TeardownFlush) {
        let beacon = Arc::new(RecordingBeacon::default());
        let flush = TeardownFlush::new(store, beacon.clone(), "https://example.test/progress/batch".into());
        (beacon, flush)
    }

    #[test]
    fn test_flush_sends_all_reportable_courses() {
        let store = Arc::new(ProgressStore::open(Arc::new(MemoryStore::new())));
        store.record_total_videos(1, 4);
        store.record_total_videos(2, 2);
        store.mark_complete(1, 1);
        store.mark_complete(2, 1);
        store.mark_complete(2, 2);
        store.mark_complete(3, 1);

        let (beacon, flush) = flush_with(store);
        let report = flush.flush();

        assert!(report.dispatched);
        assert_eq!(report.courses, 2);
        assert_eq!(report.skipped_without_total, 1);

        let sent = beacon.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://example.test/progress/batch");
        let body: BatchProgressUpdate = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(
            body.updates,
            vec![
                CourseProgress { course_id: 1, percent: 25 },
                CourseProgress { course_id: 2, percent: 100 },
            ]
        );
    }

    #[test]
    fn test_flush_with_nothing_pending_sends_nothing() {
        let store = Arc::new(ProgressStore::open(Arc::new(MemoryStore::new())));
        let (beacon, flush) = flush_with(store);

        let report = flush.flush();
        assert!(!report.dispatched);
        assert!(beacon.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_http_beacon_needs_runtime() {
        let beacon = HttpBeacon::new(reqwest::Client::new());
        assert!(!beacon.send("http://127.0.0.1:9/batch", b"{}".to_vec()));
    }
}
