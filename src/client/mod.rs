// Request/response boundary to the processing service
//
// Every operation is a single network call with no retry of its own; retry
// policy belongs to the caller (see the tracker module). The HTTP
// implementation lives in `http`; tests substitute their own `TaskApi`.

pub mod http;

use async_trait::async_trait;
use std::sync::Arc;

pub use http::HttpTaskApi;
use crate::config::ApiConfig;
use crate::error::Result;
use crate::feedback::Feedback;
use crate::task::{TaskId, TaskSnapshot};

/// Video content to upload, already validated by the submission flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoUpload {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Operations offered by the processing service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Upload a video file and create a new task
    async fn submit_file(&self, upload: VideoUpload) -> Result<TaskId>;

    /// Create a new task from a video URL
    async fn submit_url(&self, url: &str) -> Result<TaskId>;

    /// Fetch the current status of a task
    async fn get_status(&self, task_id: &TaskId) -> Result<TaskSnapshot>;

    /// Fetch the finished video
    async fn fetch_artifact(&self, task_id: &TaskId) -> Result<Vec<u8>>;

    /// Send a rating for a finished task
    async fn submit_feedback(&self, task_id: &TaskId, feedback: &Feedback) -> Result<()>;

    /// Location the finished video can be streamed from
    fn download_url(&self, task_id: &TaskId) -> Result<String>;
}

/// Factory for creating API clients
pub struct TaskApiFactory;

impl TaskApiFactory {
    /// Create the HTTP client used against a real deployment
    pub fn create_http(config: &ApiConfig) -> Result<Arc<dyn TaskApi>> {
        Ok(Arc::new(HttpTaskApi::new(config)?))
    }
}
