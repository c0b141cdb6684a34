//! API data models

use serde::{Deserialize, Serialize};

use crate::pipeline::TaskOptions;

/// Where the submitted media comes from: inline upload or remote URL
#[derive(Debug)]
pub enum MediaSource {
    Bytes(Vec<u8>),
    Url(String),
}

/// A fully parsed submission request
#[derive(Debug)]
pub struct AnalyzeRequest {
    pub source: MediaSource,
    pub options: TaskOptions,
}

/// Response to a successful submission
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub task_id: String,
    pub status: String,
}

/// Poll response while the task is still running
#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub status: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

/// Poll response for a task that ended in error
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: String) -> Self {
        Self {
            status: "error".to_string(),
            message,
        }
    }
}
