//! Data models shared by the progress engine and the HTTP client.
//!
//! - `Course`, `CourseDraft`, `Trainer`: catalog entities returned by read endpoints
//! - `CourseProgress`, `BatchProgressUpdate`: outbound progress payloads
//! - `SyncStatus`: UI-facing snapshot of the sync state

pub mod course;
pub mod progress;

pub use course::{Course, CourseDraft, Trainer};
pub use progress::{BatchProgressUpdate, CourseProgress, SyncStatus};
