//! Read-through caching for catalog endpoints.
//!
//! Each resource has its own TTL. Writes invalidate the entries they make
//! stale, and concurrent misses for one key share a single request. Cached
//! values remember when their request was issued, so callers can tell a
//! cached catalog from a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{ApiClient, ApiError};
use crate::cache::{spawn_sweeper, SharedTtlCache, TtlCache};
use crate::models::{Course, CourseDraft, Trainer};

const COURSES_KEY: &str = "courses:all";
const TRAINERS_KEY: &str = "trainers:all";

fn course_key(course_id: i64) -> String {
    format!("course:{}", course_id)
}

/// Per-resource cache lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogTtls {
    pub courses: Duration,
    pub course_detail: Duration,
    pub trainers: Duration,
}

impl Default for CatalogTtls {
    fn default() -> Self {
        Self {
            courses: Duration::from_secs(60),
            course_detail: Duration::from_secs(120),
            trainers: Duration::from_secs(60),
        }
    }
}

/// A catalog value together with the moment its request was issued.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub fetched_at: Instant,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Fetched<Value>, Arc<ApiError>>>>;

pub struct CatalogClient {
    api: ApiClient,
    cache: SharedTtlCache<Fetched<Value>>,
    ttls: CatalogTtls,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

impl CatalogClient {
    pub fn new(api: ApiClient, ttls: CatalogTtls) -> Self {
        Self {
            api,
            cache: Arc::new(Mutex::new(TtlCache::new())),
            ttls,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Handle to the underlying cache, e.g. for a full reset.
    pub fn cache(&self) -> SharedTtlCache<Fetched<Value>> {
        Arc::clone(&self.cache)
    }

    /// Periodically evict expired entries. Reads stay correct without it.
    pub fn start_sweeper(&self, period: Duration) -> JoinHandle<()> {
        spawn_sweeper(self.cache(), period)
    }

    fn cached_value(&self, key: &str) -> Option<Fetched<Value>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_cloned(key)
    }

    /// Drop cached values for `keys` and detach any request still in flight
    /// for them, so its pre-write response is neither cached nor joined.
    fn invalidate(&self, keys: &[&str]) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if cache.delete(key) {
                debug!(key, "Cache entry invalidated");
            }
            if in_flight.remove(*key).is_some() {
                debug!(key, "In-flight fetch detached");
            }
        }
    }

    async fn cached<T: DeserializeOwned>(
        &self,
        key: &str,
        path: &str,
        ttl: Duration,
    ) -> Result<Fetched<T>, ApiError> {
        if let Some(fetched) = self.cached_value(key) {
            debug!(key, "Cache hit");
            return decode(key, fetched);
        }

        let fetch = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            in_flight
                .entry(key.to_string())
                .or_insert_with(|| {
                    debug!(key, "Cache miss, fetching");
                    let api = self.api.clone();
                    let path = path.to_string();
                    async move {
                        let fetched_at = Instant::now();
                        let value = api.get::<Value>(&path).await.map_err(Arc::new)?;
                        Ok::<_, Arc<ApiError>>(Fetched { value, fetched_at })
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };

        let result = fetch.clone().await;

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.get(key).is_some_and(|current| current.ptr_eq(&fetch)) {
                in_flight.remove(key);
                if let Ok(ref fetched) = result {
                    self.cache
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .set(key, fetched.clone(), ttl);
                }
            }
        }

        match result {
            Ok(fetched) => decode(key, fetched),
            Err(e) => Err(Arc::try_unwrap(e).unwrap_or_else(ApiError::Shared)),
        }
    }

    // ===== Reads =====

    pub async fn courses(&self) -> Result<Vec<Course>, ApiError> {
        Ok(self.fetched_courses().await?.value)
    }

    /// All courses plus when they were requested; feed both to `ProgressEngine::apply_courses`.
    pub async fn fetched_courses(&self) -> Result<Fetched<Vec<Course>>, ApiError> {
        self.cached(COURSES_KEY, "/courses", self.ttls.courses).await
    }

    pub async fn course(&self, course_id: i64) -> Result<Course, ApiError> {
        Ok(self.fetched_course(course_id).await?.value)
    }

    pub async fn fetched_course(&self, course_id: i64) -> Result<Fetched<Course>, ApiError> {
        let path = format!("/courses/{}", course_id);
        self.cached(&course_key(course_id), &path, self.ttls.course_detail)
            .await
    }

    pub async fn trainers(&self) -> Result<Vec<Trainer>, ApiError> {
        Ok(self
            .cached(TRAINERS_KEY, "/trainers", self.ttls.trainers)
            .await?
            .value)
    }

    // ===== Writes =====

    pub async fn create_course(&self, draft: &CourseDraft) -> Result<Course, ApiError> {
        let course = self.api.create_course(draft).await?;
        self.invalidate(&[COURSES_KEY]);
        Ok(course)
    }

    pub async fn update_course(&self, course_id: i64, draft: &CourseDraft) -> Result<Course, ApiError> {
        let course = self.api.update_course(course_id, draft).await?;
        let key = course_key(course_id);
        self.invalidate(&[key.as_str(), COURSES_KEY]);
        Ok(course)
    }

    pub async fn delete_trainer(&self, trainer_id: i64) -> Result<(), ApiError> {
        self.api.delete_trainer(trainer_id).await?;
        self.invalidate(&[TRAINERS_KEY]);
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(key: &str, fetched: Fetched<Value>) -> Result<Fetched<T>, ApiError> {
    let value = serde_json::from_value(fetched.value)
        .map_err(|e| ApiError::InvalidResponse(format!("Unexpected shape for {}: {}", key, e)))?;
    Ok(Fetched {
        value,
        fetched_at: fetched.fetched_at,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Mock, Server, ServerGuard};

    const COURSES_JSON: &str = r#"[{"id": 1, "title": "Rust", "totalVideos": 4}, {"id": 2, "title": "Go"}]"#;

    fn catalog(server: &Server, ttls: CatalogTtls) -> CatalogClient {
        let api = ApiClient::new(server.url())
            .expect("Failed to build client")
            .with_initial_backoff(Duration::from_millis(1));
        CatalogClient::new(api, ttls)
    }

    async fn mock_get(server: &mut ServerGuard, path: &str, body: &str, hits: usize) -> Mock {
        server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_repeated_reads_hit_cache() {
        let mut server = Server::new_async().await;
        let mock = mock_get(&mut server, "/courses", COURSES_JSON, 1).await;
        let catalog = catalog(&server, CatalogTtls::default());

        let first = catalog.courses().await.unwrap();
        let second = catalog.courses().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_request() {
        let mut server = Server::new_async().await;
        let mock = mock_get(&mut server, "/trainers", r#"[{"id": 3, "name": "Sam"}]"#, 1).await;
        let catalog = catalog(&server, CatalogTtls::default());

        let (a, b, c) = tokio::join!(catalog.trainers(), catalog.trainers(), catalog.trainers());
        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 1);
        assert_eq!(c.unwrap().len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let mut server = Server::new_async().await;
        let mock = mock_get(&mut server, "/courses/1", r#"{"id": 1, "title": "Rust"}"#, 2).await;
        let ttls = CatalogTtls {
            course_detail: Duration::from_millis(20),
            ..CatalogTtls::default()
        };
        let catalog = catalog(&server, ttls);

        catalog.course(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        catalog.course(1).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_course_invalidates_detail_and_list() {
        let mut server = Server::new_async().await;
        let list = mock_get(&mut server, "/courses", COURSES_JSON, 2).await;
        let detail = mock_get(&mut server, "/courses/1", r#"{"id": 1, "title": "Rust"}"#, 2).await;
        let trainers = mock_get(&mut server, "/trainers", "[]", 1).await;
        server
            .mock("PUT", "/courses/1")
            .with_status(200)
            .with_body(r#"{"id": 1, "title": "Rust 2"}"#)
            .create_async()
            .await;
        let catalog = catalog(&server, CatalogTtls::default());

        catalog.courses().await.unwrap();
        catalog.course(1).await.unwrap();
        catalog.trainers().await.unwrap();

        let draft = CourseDraft {
            title: "Rust 2".to_string(),
            ..Default::default()
        };
        let updated = catalog.update_course(1, &draft).await.unwrap();
        assert_eq!(updated.title, "Rust 2");

        catalog.courses().await.unwrap();
        catalog.course(1).await.unwrap();
        catalog.trainers().await.unwrap();

        list.assert_async().await;
        detail.assert_async().await;
        trainers.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_detaches_in_flight_read() {
        let mut server = Server::new_async().await;
        let fresh = mock_get(&mut server, "/courses", r#"[{"id": 1, "title": "NEW"}]"#, 1).await;
        server
            .mock("PUT", "/courses/1")
            .with_status(200)
            .with_body(r#"{"id": 1, "title": "NEW"}"#)
            .create_async()
            .await;
        let catalog = catalog(&server, CatalogTtls::default());

        // A list request issued before the write, still waiting for its response
        let (respond, response) = tokio::sync::oneshot::channel::<Value>();
        let pending: SharedFetch = async move {
            let value = response.await.unwrap_or(Value::Null);
            Ok::<_, Arc<ApiError>>(Fetched {
                value,
                fetched_at: Instant::now(),
            })
        }
        .boxed()
        .shared();
        catalog
            .in_flight
            .lock()
            .unwrap()
            .insert(COURSES_KEY.to_string(), pending);

        let draft = CourseDraft {
            title: "NEW".to_string(),
            ..Default::default()
        };
        let (during_write, ()) = tokio::join!(catalog.courses(), async {
            tokio::task::yield_now().await;
            catalog.update_course(1, &draft).await.unwrap();
            let old: Value = serde_json::from_str(r#"[{"id": 1, "title": "OLD"}]"#).unwrap();
            respond.send(old).unwrap();
        });

        // The reader that was already waiting sees the old list, but it is not cached
        assert_eq!(during_write.unwrap()[0].title, "OLD");
        assert!(catalog.cache().lock().unwrap().is_empty());
        assert!(catalog.in_flight.lock().unwrap().is_empty());

        let after_write = catalog.courses().await.unwrap();
        assert_eq!(after_write[0].title, "NEW");
        fresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_cache_hit_keeps_original_fetch_time() {
        let mut server = Server::new_async().await;
        let mock = mock_get(&mut server, "/courses", COURSES_JSON, 1).await;
        let catalog = catalog(&server, CatalogTtls::default());

        let first = catalog.fetched_courses().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = catalog.fetched_courses().await.unwrap();

        assert_eq!(first, second);
        assert!(first.fetched_at < Instant::now());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_trainer_invalidates_trainer_list() {
        let mut server = Server::new_async().await;
        let list = mock_get(&mut server, "/trainers", "[]", 2).await;
        server
            .mock("DELETE", "/trainers/9")
            .with_status(204)
            .create_async()
            .await;
        let catalog = catalog(&server, CatalogTtls::default());

        catalog.trainers().await.unwrap();
        catalog.delete_trainer(9).await.unwrap();
        catalog.trainers().await.unwrap();
        list.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("GET", "/courses")
            .with_status(500)
            .with_body("down")
            .expect(1)
            .create_async()
            .await;
        let catalog = catalog(&server, CatalogTtls::default());

        let err = catalog.courses().await.unwrap_err();
        assert!(matches!(err, ApiError::ServerError(_)));
        assert!(catalog.cache().lock().unwrap().is_empty());
        failing.assert_async().await;
    }
}
