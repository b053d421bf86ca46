//! HTTP client for the progress and catalog endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::ApiError;
use crate::models::{BatchProgressUpdate, Course, CourseDraft, CourseProgress, Trainer};
use crate::sync::ProgressService;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Path of the batch progress endpoint, also used as the teardown beacon target.
pub const BATCH_PROGRESS_PATH: &str = "/progress/batch";

#[derive(Debug, Serialize)]
struct PercentBody {
    percent: u8,
}

/// API client for the learning platform.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a new API client for `base_url` (e.g. `https://learn.example.com/api`)
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            token: Some(token),
            ..self.clone()
        }
    }

    /// Override the first rate-limit backoff delay; it doubles on each retry.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Underlying HTTP client, for transports that should share the pool.
    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request, retrying with exponential backoff while rate limited.
    async fn execute<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = build().send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(
                    url = %response.url(),
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().to_string();
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url, e)))
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(|| self.request(Method::GET, path)).await?;
        Self::parse(response).await
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Response, ApiError> {
        self.execute(|| self.request(method.clone(), path).json(body))
            .await
    }

    // ===== Progress =====

    /// Report the completion percent of one course
    pub async fn update_course_progress(&self, course_id: i64, percent: u8) -> Result<(), ApiError> {
        let path = format!("/progress/courses/{}", course_id);
        self.send_json(Method::PUT, &path, &PercentBody { percent })
            .await?;
        debug!(course_id, percent, "Course progress update accepted");
        Ok(())
    }

    /// Report the completion percent of several courses at once
    pub async fn update_progress_batch(&self, updates: &[CourseProgress]) -> Result<(), ApiError> {
        let body = BatchProgressUpdate {
            updates: updates.to_vec(),
        };
        self.send_json(Method::POST, BATCH_PROGRESS_PATH, &body).await?;
        debug!(courses = updates.len(), "Batch progress update accepted");
        Ok(())
    }

    // ===== Catalog =====

    /// Fetch every course in the catalog
    pub async fn fetch_courses(&self) -> Result<Vec<Course>, ApiError> {
        self.get("/courses").await
    }

    /// Fetch a single course with its lesson count
    pub async fn fetch_course(&self, course_id: i64) -> Result<Course, ApiError> {
        self.get(&format!("/courses/{}", course_id)).await
    }

    /// Fetch every trainer
    pub async fn fetch_trainers(&self) -> Result<Vec<Trainer>, ApiError> {
        self.get("/trainers").await
    }

    pub async fn create_course(&self, draft: &CourseDraft) -> Result<Course, ApiError> {
        let response = self.send_json(Method::POST, "/courses", draft).await?;
        Self::parse(response).await
    }

    pub async fn update_course(&self, course_id: i64, draft: &CourseDraft) -> Result<Course, ApiError> {
        let path = format!("/courses/{}", course_id);
        let response = self.send_json(Method::PUT, &path, draft).await?;
        Self::parse(response).await
    }

    pub async fn delete_trainer(&self, trainer_id: i64) -> Result<(), ApiError> {
        let path = format!("/trainers/{}", trainer_id);
        self.execute(|| self.request(Method::DELETE, &path)).await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressService for ApiClient {
    async fn update_one(&self, course_id: i64, percent: u8) -> Result<(), ApiError> {
        self.update_course_progress(course_id, percent).await
    }

    async fn update_many(&self, updates: &[CourseProgress]) -> Result<(), ApiError> {
        self.update_progress_batch(updates).await
    }
}

// ============================================================================
// Tests
// ============================================================================
