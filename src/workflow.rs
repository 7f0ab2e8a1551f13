use std::fmt;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{TaskApi, TaskApiFactory};
use crate::config::Config;
use crate::display::ProgressDisplay;
use crate::error::{OneVoiceError, Result};
use crate::feedback::FeedbackForm;
use crate::progress;
use crate::submission::{SubmissionFlow, SubmissionRequest};
use crate::task::{TaskId, TaskSnapshot, TaskStatus};
use crate::tracker::{PollPolicy, PollSession, SessionOutcome};

/// Which view the user is on. Moves are driven by lifecycle outcomes only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Submission,
    Progress(TaskId),
    Result(TaskId),
}

impl Route {
    /// Where to go once the session behind this route has ended.
    ///
    /// A completed task moves on to its result. A failed task stays on its
    /// progress view so the error can be shown. Leaving mid-flight returns to
    /// submission.
    pub fn after(&self, outcome: &SessionOutcome) -> Route {
        match (self, outcome) {
            (Route::Progress(id), SessionOutcome::Completed(_)) => Route::Result(id.clone()),
            (Route::Progress(id), SessionOutcome::Failed(_)) => Route::Progress(id.clone()),
            (Route::Progress(_), SessionOutcome::TornDown) => Route::Submission,
            (route, _) => route.clone(),
        }
    }
}

/// File name a finished video is saved under.
pub fn artifact_file_name(task_id: &TaskId) -> String {
    let safe: String = task_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("dubbed_video_{}.mp4", safe)
}

/// One-shot answer to "where is my task".
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub task_id: TaskId,
    pub snapshot: TaskSnapshot,
    pub download_url: Option<String>,
}

impl StatusReport {
    pub fn display_percent(&self) -> u8 {
        progress::display_percent(self.snapshot.overall_percent())
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Task:     {}", self.task_id)?;
        writeln!(f, "Status:   {}", self.snapshot.status)?;
        if let Some(stage) = &self.snapshot.stage {
            writeln!(f, "Stage:    {} ({:.0}%)", stage, self.snapshot.stage_progress())?;
        }
        write!(f, "Progress: {}%", self.display_percent())?;
        if let Some(error) = &self.snapshot.error {
            write!(f, "\nError:    {}", error)?;
        }
        if let Some(url) = &self.download_url {
            write!(f, "\nDownload: {}", url)?;
        }
        Ok(())
    }
}

/// Everything `Workflow::process` needs from the user.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub request: SubmissionRequest,
    pub output_dir: Option<PathBuf>,
    pub download: bool,
    pub rating: Option<u8>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub task_id: TaskId,
    pub route: Route,
    pub artifact: Option<PathBuf>,
    /// Confirmation from the feedback endpoint.
    pub feedback: Option<String>,
    /// Why feedback could not be sent; the rest of the run still stands.
    pub feedback_error: Option<String>,
}

pub struct Workflow {
    config: Config,
    api: Arc<dyn TaskApi>,
    submission: SubmissionFlow,
    show_progress: bool,
    shutdown: CancellationToken,
}

impl Workflow {
    pub fn new(config: Config) -> Result<Self> {
        let api = TaskApiFactory::create_http(&config.api)?;
        Ok(Self::with_api(config, api))
    }

    pub fn with_api(config: Config, api: Arc<dyn TaskApi>) -> Self {
        Self {
            submission: SubmissionFlow::new(api.clone()),
            config,
            api,
            show_progress: true,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop every operation of this workflow once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Hide the terminal progress bar.
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Submit, track, then fetch the result and send feedback as requested.
    pub async fn process(&self, options: &ProcessOptions) -> Result<ProcessReport> {
        let mut route = Route::Submission;

        let task_id = self.submit(&options.request).await?;
        route = self.navigate(route, Route::Progress(task_id.clone()));

        let outcome = self.track(&task_id).await?;
        route = self.navigate(route.clone(), route.after(&outcome));

        let mut report = ProcessReport {
            task_id: task_id.clone(),
            route: route.clone(),
            artifact: None,
            feedback: None,
            feedback_error: None,
        };

        match outcome {
            SessionOutcome::Completed(_) => {
                if options.download {
                    report.artifact =
                        Some(self.download_artifact(&task_id, options.output_dir.as_deref()).await?);
                } else {
                    info!("Result available at {}", self.download_url(&task_id)?);
                }

                if let Some(rating) = options.rating {
                    match self.send_feedback(&task_id, rating, options.comment.clone()).await {
                        Ok(message) => report.feedback = Some(message),
                        Err(OneVoiceError::Interrupted) => return Err(OneVoiceError::Interrupted),
                        Err(e) => {
                            warn!("Feedback for {} was not sent: {}", task_id, e);
                            report.feedback_error = Some(e.to_string());
                        }
                    }
                }
                Ok(report)
            }
            SessionOutcome::Failed(failure) => Err(failure.into()),
            SessionOutcome::TornDown => Ok(report),
        }
    }

    pub async fn submit(&self, request: &SubmissionRequest) -> Result<TaskId> {
        self.interruptible(self.submission.submit(request)).await
    }

    /// Poll `task_id` until it finishes or the workflow is shut down.
    pub async fn track(&self, task_id: &TaskId) -> Result<SessionOutcome> {
        let display = if self.show_progress {
            ProgressDisplay::new()
        } else {
            ProgressDisplay::hidden()
        };

        let handle = PollSession::new(self.api.clone(), PollPolicy::from(&self.config.polling))
            .spawn_with_token(task_id.clone(), self.shutdown.child_token());

        let mut views = handle.subscribe();
        // Ends when the session drops its sender.
        while views.changed().await.is_ok() {
            display.update(&views.borrow_and_update());
        }

        let outcome = handle.wait().await;
        display.finish(&outcome);
        if outcome == SessionOutcome::TornDown {
            warn!("No longer watching task {}", task_id);
        }
        Ok(outcome)
    }

    /// Current status of a task, without tracking it.
    pub async fn status(&self, task_id: &TaskId) -> Result<StatusReport> {
        let snapshot = self.interruptible(self.api.get_status(task_id)).await?;
        let download_url = match snapshot.status {
            TaskStatus::Completed => Some(self.api.download_url(task_id)?),
            _ => None,
        };

        Ok(StatusReport {
            task_id: task_id.clone(),
            snapshot,
            download_url,
        })
    }

    /// Save the finished video and return where it was written.
    ///
    /// Status is re-fetched first; nothing is downloaded for a task that has
    /// not completed.
    pub async fn download_artifact(&self, task_id: &TaskId, output_dir: Option<&Path>) -> Result<PathBuf> {
        self.interruptible(self.fetch_and_save(task_id, output_dir)).await
    }

    async fn fetch_and_save(&self, task_id: &TaskId, output_dir: Option<&Path>) -> Result<PathBuf> {
        let snapshot = self.api.get_status(task_id).await?;
        match snapshot.status {
            TaskStatus::Completed => {}
            TaskStatus::Failed => {
                return Err(OneVoiceError::BackendReportedFailure(snapshot.failure_message()));
            }
            TaskStatus::Pending | TaskStatus::Processing => {
                return Err(OneVoiceError::NotReady(task_id.to_string()));
            }
        }

        let content = self.api.fetch_artifact(task_id).await?;

        let output_dir = output_dir.unwrap_or(&self.config.output.directory).to_path_buf();
        fs::create_dir_all(&output_dir).await?;
        let target = output_dir.join(artifact_file_name(task_id));

        let written = target.clone();
        tokio::task::spawn_blocking(move || write_atomically(&output_dir, &written, &content))
            .await
            .map_err(|e| OneVoiceError::Io(std::io::Error::other(e)))??;

        info!("Saved dubbed video to {}", target.display());
        Ok(target)
    }

    /// Rate a finished task. Returns the confirmation message.
    pub async fn send_feedback(&self, task_id: &TaskId, rating: u8, comment: Option<String>) -> Result<String> {
        let mut form = FeedbackForm::new(task_id.clone());
        form.set_rating(rating)?;
        if let Some(comment) = comment {
            form.set_comment(comment);
        }

        self.interruptible(form.submit(self.api.as_ref())).await?;
        Ok(form.status().message().unwrap_or_default().to_string())
    }

    pub fn download_url(&self, task_id: &TaskId) -> Result<String> {
        self.api.download_url(task_id)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn interruptible<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(OneVoiceError::Interrupted),
            result = operation => result,
        }
    }

    fn navigate(&self, from: Route, to: Route) -> Route {
        if from != to {
            info!("Route: {:?} -> {:?}", from, to);
        }
        to
    }
}

fn write_atomically(dir: &Path, target: &Path, content: &[u8]) -> Result<()> {
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(target).map_err(|e| OneVoiceError::Io(e.error))?;
    Ok(())
}
