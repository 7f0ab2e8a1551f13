use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::client::{TaskApi, VideoUpload};
use crate::error::{OneVoiceError, Result};
use crate::task::TaskId;

const BOTH_GIVEN: &str = "Provide either a video file or a YouTube URL, not both.";
const NONE_GIVEN: &str = "Upload an MP4 file or enter a YouTube URL.";
const MP4_ONLY: &str = "Only MP4 files can be uploaded.";

/// ISO-BMFF files open with a box whose type field, at offset 4, is `ftyp`.
const FTYP_OFFSET: usize = 4;
const FTYP: &[u8; 4] = b"ftyp";

/// Raw user input for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub file: Option<PathBuf>,
    pub url: Option<String>,
}

/// Validated source of a new task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    File(PathBuf),
    Url(String),
}

impl SubmissionRequest {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self { file: Some(path.into()), url: None }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self { file: None, url: Some(url.into()) }
    }

    /// Checks that need no I/O. A blank URL counts as no URL.
    pub fn validate(&self) -> Result<VideoSource> {
        let url = self.url.as_deref().map(str::trim).filter(|u| !u.is_empty());

        match (&self.file, url) {
            (Some(_), Some(_)) => Err(OneVoiceError::Validation(BOTH_GIVEN.to_string())),
            (None, None) => Err(OneVoiceError::Validation(NONE_GIVEN.to_string())),
            (Some(path), None) => {
                if !has_mp4_extension(path) {
                    return Err(OneVoiceError::Validation(MP4_ONLY.to_string()));
                }
                Ok(VideoSource::File(path.clone()))
            }
            (None, Some(url)) => {
                validate_url(url)?;
                Ok(VideoSource::Url(url.to_string()))
            }
        }
    }
}

fn has_mp4_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|_| OneVoiceError::Validation(format!("'{}' is not a valid URL.", url)))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(OneVoiceError::Validation(format!("'{}' is not an http(s) URL.", url)));
    }
    Ok(())
}

/// Whether `content` carries the MP4 container signature.
pub fn looks_like_mp4(content: &[u8]) -> bool {
    content.get(FTYP_OFFSET..FTYP_OFFSET + FTYP.len()) == Some(FTYP.as_slice())
}

/// Read and check a video file for upload.
pub async fn prepare_upload(path: &Path) -> Result<VideoUpload> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OneVoiceError::Validation(format!(
                "Video file not found: {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    if !looks_like_mp4(&content) {
        warn!("{} has an .mp4 extension but no MP4 signature", path.display());
        return Err(OneVoiceError::Validation(MP4_ONLY.to_string()));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video.mp4".to_string());

    Ok(VideoUpload { file_name, content })
}

/// Creates tasks, one at a time.
pub struct SubmissionFlow {
    api: Arc<dyn TaskApi>,
    in_flight: AtomicBool,
}

/// Releases the submission slot when the request ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SubmissionFlow {
    pub fn new(api: Arc<dyn TaskApi>) -> Self {
        Self {
            api,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Validate the request and create a task.
    ///
    /// Validation failures never reach the network. While one submission is
    /// outstanding any other fails with `SubmissionInProgress`.
    pub async fn submit(&self, request: &SubmissionRequest) -> Result<TaskId> {
        let source = request.validate()?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Rejecting duplicate submission");
            return Err(OneVoiceError::SubmissionInProgress);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let task_id = match source {
            VideoSource::File(path) => {
                let upload = prepare_upload(&path).await?;
                info!("Uploading {} ({} bytes)", upload.file_name, upload.content.len());
                self.api.submit_file(upload).await?
            }
            VideoSource::Url(url) => {
                info!("Submitting video URL {}", url);
                self.api.submit_url(&url).await?
            }
        };

        info!("Created task {}", task_id);
        Ok(task_id)
    }
}
