use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{OneVoiceError, Result};
use crate::progress;

/// Shown for a failed task whose report carries no usable error text.
pub const GENERIC_FAILURE: &str = "An error occurred during processing.";

/// Opaque task identifier issued by the processing service on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(OneVoiceError::Validation("Task id must not be empty".to_string()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = OneVoiceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing stage reported by the backend while a task is `processing`.
///
/// Only the three weighted stages carry meaning for the progress bar. Any other
/// stage name the backend reports (it also knows `diarization` and `merge`) is
/// kept verbatim so it can still be shown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Stage {
    Stt,
    Translation,
    Tts,
    Other(String),
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stt => "stt",
            Self::Translation => "translation",
            Self::Tts => "tts",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Stage {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "stt" => Self::Stt,
            "translation" => Self::Translation,
            "tts" => Self::Tts,
            _ => Self::Other(value),
        }
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status report for a task, as returned by the status endpoint.
///
/// The backend owns the task; the client only ever holds copies of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    #[serde(default)]
    pub stage: Option<Stage>,
    /// Percent completion within the current stage.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    /// Backend-side reference to the produced artifact.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub gcs_url: Option<String>,
}

impl TaskSnapshot {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            stage: None,
            progress: Some(0.0),
            error: None,
            result: None,
            gcs_url: None,
        }
    }

    /// Within-stage progress clamped to `[0, 100]`; missing or non-finite values count as 0.
    pub fn stage_progress(&self) -> f64 {
        match self.progress {
            Some(p) if p.is_finite() => p.clamp(0.0, 100.0),
            _ => 0.0,
        }
    }

    /// The backend's error text, or a generic message when it is missing or blank.
    pub fn failure_message(&self) -> String {
        self.error
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| GENERIC_FAILURE.to_string())
    }

    /// Overall percent across all stages for this snapshot alone.
    pub fn overall_percent(&self) -> f64 {
        match self.status {
            TaskStatus::Pending => progress::normalize(None, 0.0),
            TaskStatus::Completed => 100.0,
            TaskStatus::Processing | TaskStatus::Failed => {
                progress::normalize(self.stage.as_ref(), self.stage_progress())
            }
        }
    }
}

/// Body returned by both submission endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}
