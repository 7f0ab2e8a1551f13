use std::fmt;
use serde::Serialize;
use tracing::{info, warn};

use crate::client::TaskApi;
use crate::error::{OneVoiceError, Result};
use crate::task::TaskId;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

const CONFIRMATION: &str = "Thank you for your feedback!";

/// A quality rating between 1 and 5 stars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: u8) -> Result<Self> {
        if (MIN_RATING..=MAX_RATING).contains(&value) {
            Ok(Self(value))
        } else {
            Err(OneVoiceError::Validation(format!(
                "Rating must be between {} and {}, got {}",
                MIN_RATING, MAX_RATING, value
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body sent to the feedback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feedback {
    pub rating: Rating,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackStatus {
    Editing,
    Submitting,
    /// Holds the confirmation shown to the user.
    Submitted(String),
    /// Holds the error shown to the user; the entered rating and comment are kept.
    Failed(String),
}

impl FeedbackStatus {
    /// Text to show the user, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Submitted(message) | Self::Failed(message) => Some(message),
            Self::Editing | Self::Submitting => None,
        }
    }
}

/// Feedback entry for one finished task.
///
/// Sending again after a success is allowed; the backend keeps the last rating.
#[derive(Debug, Clone)]
pub struct FeedbackForm {
    task_id: TaskId,
    rating: Option<Rating>,
    comment: String,
    status: FeedbackStatus,
}

impl FeedbackForm {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            rating: None,
            comment: String::new(),
            status: FeedbackStatus::Editing,
        }
    }

    pub fn set_rating(&mut self, value: u8) -> Result<()> {
        self.rating = Some(Rating::new(value)?);
        Ok(())
    }

    pub fn clear_rating(&mut self) {
        self.rating = None;
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    pub fn rating(&self) -> Option<Rating> {
        self.rating
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn status(&self) -> &FeedbackStatus {
        &self.status
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn can_submit(&self) -> bool {
        self.rating.is_some() && self.status != FeedbackStatus::Submitting
    }

    /// Send the feedback once. Nothing is sent when no rating has been chosen.
    pub async fn submit(&mut self, api: &dyn TaskApi) -> Result<()> {
        let Some(rating) = self.rating else {
            return Err(OneVoiceError::Validation("Choose a rating before sending feedback.".to_string()));
        };

        let comment = self.comment.trim();
        let feedback = Feedback {
            rating,
            comment: (!comment.is_empty()).then(|| comment.to_string()),
        };

        self.status = FeedbackStatus::Submitting;
        match api.submit_feedback(&self.task_id, &feedback).await {
            Ok(()) => {
                info!("Feedback submitted for task {} (rating {})", self.task_id, rating);
                self.status = FeedbackStatus::Submitted(CONFIRMATION.to_string());
                Ok(())
            }
            Err(e) => {
                warn!("Feedback submission failed for task {}: {}", self.task_id, e);
                self.status = FeedbackStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }
}
