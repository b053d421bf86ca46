use serde::{Deserialize, Serialize};

/// A course as returned by the catalog endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trainer_id: Option<i64>,
    /// Number of lessons (videos) in the course, when the endpoint includes it.
    #[serde(default)]
    pub total_videos: Option<u32>,
    /// Completion percent as last recorded by the server.
    #[serde(default, rename = "progress")]
    pub server_progress: Option<u8>,
}

impl Course {
    /// Total video count, treating a missing or zero count as unknown.
    pub fn known_total_videos(&self) -> Option<u32> {
        self.total_videos.filter(|&n| n > 0)
    }
}

/// Body for creating or updating a course.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trainer_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trainer {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub specialty: Option<String>,
}
