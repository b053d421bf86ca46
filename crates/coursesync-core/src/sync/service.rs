use async_trait::async_trait;

use crate::api::ApiError;
use crate::models::CourseProgress;

/// The remote authority for course progress.
///
/// Both calls carry absolute percentages, so repeating one has no further effect.
#[async_trait]
pub trait ProgressService: Send + Sync {
    async fn update_one(&self, course_id: i64, percent: u8) -> Result<(), ApiError>;

    async fn update_many(&self, updates: &[CourseProgress]) -> Result<(), ApiError>;
}
