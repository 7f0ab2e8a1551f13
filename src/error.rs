use thiserror::Error;

#[derive(Error, Debug)]
pub enum OneVoiceError {
    /// Bad user input, caught before any network call.
    #[error("{0}")]
    Validation(String),

    #[error("A submission is already in progress")]
    SubmissionInProgress,

    /// Non-success HTTP response; `detail` comes from the backend error body
    /// when it has one.
    #[error("{detail}")]
    RequestFailed { status: u16, detail: String },

    /// The request never produced a response (connect failure, timeout, reset).
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response from processing service: {0}")]
    InvalidResponse(String),

    /// The task itself finished in the `failed` state.
    #[error("{0}")]
    BackendReportedFailure(String),

    #[error("Task {0} has not finished processing yet")]
    NotReady(String),

    /// The user asked to stop while the operation was running.
    #[error("Interrupted")]
    Interrupted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl OneVoiceError {
    /// Whether a failed status poll may succeed if simply tried again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::InvalidResponse(_) => true,
            Self::RequestFailed { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OneVoiceError>;
