use std::fmt;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::PollingConfig;
use crate::error::OneVoiceError;
use crate::progress;
use crate::retry::RetryPolicy;
use crate::task::{TaskId, TaskSnapshot, TaskStatus};

/// Timing rules for one poll session.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay after a non-terminal status before polling again.
    pub interval: Duration,
    /// Consecutive transient failures tolerated; the next one fails the session.
    pub max_network_retries: u32,
    pub retry: RetryPolicy,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for PollPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            max_network_retries: config.max_network_retries,
            retry: config.retry_policy(),
        }
    }
}

/// Why a tracked task ended up failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The task itself reported `failed`.
    Backend(String),
    /// The status endpoint rejected the request.
    Request { status: u16, detail: String },
    /// Transient errors outlasted the retry budget.
    Unreachable { attempts: u32, last_error: String },
    /// Any other error raised while polling.
    Client(String),
}

impl Failure {
    fn from_poll_error(err: OneVoiceError) -> Self {
        match err {
            OneVoiceError::RequestFailed { status, detail } => Self::Request { status, detail },
            other => Self::Client(other.to_string()),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(message) | Self::Client(message) => f.write_str(message),
            Self::Request { detail, .. } => f.write_str(detail),
            Self::Unreachable { attempts, last_error } => write!(
                f,
                "Lost contact with the processing service after {} attempts: {}",
                attempts, last_error
            ),
        }
    }
}

impl From<Failure> for OneVoiceError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Backend(message) => Self::BackendReportedFailure(message),
            Failure::Request { status, detail } => Self::RequestFailed { status, detail },
            unreachable @ Failure::Unreachable { .. } => Self::Network(unreachable.to_string()),
            Failure::Client(message) => Self::InvalidResponse(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleState {
    /// No task yet.
    Idle,
    Polling { task_id: TaskId },
    Completed { task_id: TaskId, snapshot: TaskSnapshot },
    Failed { task_id: TaskId, failure: Failure },
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Idle => None,
            Self::Polling { task_id }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. } => Some(task_id),
        }
    }
}

/// What the driver should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    PollNow,
    PollAfter(Duration),
    Stop,
}

/// How a poll session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed(TaskSnapshot),
    Failed(Failure),
    /// The session was cancelled before the task reached a terminal state.
    TornDown,
}

/// Everything a progress view needs to render one moment of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: LifecycleState,
    pub snapshot: Option<TaskSnapshot>,
    /// Highest overall percent seen so far.
    pub overall_percent: f64,
    /// Consecutive transient poll failures; 0 once a poll succeeds.
    pub transient_failures: u32,
    pub polls_issued: u64,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl SessionView {
    pub fn display_percent(&self) -> u8 {
        progress::display_percent(self.overall_percent)
    }

    pub fn stage_label(&self) -> String {
        match &self.state {
            LifecycleState::Completed { .. } => "Processing complete!".to_string(),
            LifecycleState::Failed { .. } => "Processing failed".to_string(),
            _ => progress::stage_label(self.snapshot.as_ref().and_then(|s| s.stage.as_ref())),
        }
    }
}

/// Task lifecycle: Idle -> Polling -> Completed | Failed.
///
/// Pure bookkeeping; the async driver in `session` performs the I/O. The
/// machine refuses to hand out a poll while one is outstanding, after a
/// terminal state, or after teardown, and drops any response it was not
/// waiting for.
#[derive(Debug)]
pub struct TaskLifecycle {
    policy: PollPolicy,
    state: LifecycleState,
    snapshot: Option<TaskSnapshot>,
    overall_percent: f64,
    transient_failures: u32,
    in_flight: bool,
    torn_down: bool,
    polls_issued: u64,
    last_polled_at: Option<DateTime<Utc>>,
}

impl TaskLifecycle {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            state: LifecycleState::Idle,
            snapshot: None,
            overall_percent: 0.0,
            transient_failures: 0,
            in_flight: false,
            torn_down: false,
            polls_issued: 0,
            last_polled_at: None,
        }
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn poll_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Idle -> Polling once a task id is known. The first poll is immediate.
    pub fn start(&mut self, task_id: TaskId) -> Next {
        if self.torn_down || self.state != LifecycleState::Idle {
            warn!("Ignoring start for {}: session is not idle", task_id);
            return Next::Stop;
        }

        debug!("Tracking task {}", task_id);
        self.state = LifecycleState::Polling { task_id };
        Next::PollNow
    }

    /// Claim the single poll slot. `None` while a poll is outstanding or once
    /// polling has ended.
    pub fn begin_poll(&mut self) -> Option<TaskId> {
        if self.torn_down || self.in_flight {
            return None;
        }
        let LifecycleState::Polling { task_id } = &self.state else {
            return None;
        };

        self.in_flight = true;
        self.polls_issued += 1;
        Some(task_id.clone())
    }

    /// Apply the response to the outstanding poll.
    ///
    /// Returns `None` when the response was discarded because no poll was
    /// outstanding (stale, or the session was torn down).
    pub fn complete_poll(&mut self, result: crate::error::Result<TaskSnapshot>) -> Option<Next> {
        if self.torn_down || !self.in_flight {
            debug!("Discarding status response that arrived outside an active poll");
            return None;
        }
        self.in_flight = false;
        self.last_polled_at = Some(Utc::now());

        let task_id = self.state.task_id()?.clone();

        let next = match result {
            Ok(snapshot) => self.apply_snapshot(task_id, snapshot),
            Err(err) if err.is_transient() => self.apply_transient_error(task_id, err),
            Err(err) => {
                debug!("Status poll for {} failed permanently: {}", task_id, err);
                self.fail(task_id, Failure::from_poll_error(err))
            }
        };
        Some(next)
    }

    /// Stop for good. Later responses are discarded and no poll is handed out.
    pub fn tear_down(&mut self) {
        if !self.torn_down {
            debug!("Tearing down lifecycle in state {:?}", self.state);
        }
        self.torn_down = true;
        self.in_flight = false;
    }

    pub fn outcome(&self) -> SessionOutcome {
        match &self.state {
            LifecycleState::Completed { snapshot, .. } => SessionOutcome::Completed(snapshot.clone()),
            LifecycleState::Failed { failure, .. } => SessionOutcome::Failed(failure.clone()),
            LifecycleState::Idle | LifecycleState::Polling { .. } => SessionOutcome::TornDown,
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state.clone(),
            snapshot: self.snapshot.clone(),
            overall_percent: self.overall_percent,
            transient_failures: self.transient_failures,
            polls_issued: self.polls_issued,
            last_polled_at: self.last_polled_at,
        }
    }

    fn apply_snapshot(&mut self, task_id: TaskId, snapshot: TaskSnapshot) -> Next {
        self.transient_failures = 0;
        self.overall_percent = self.overall_percent.max(snapshot.overall_percent());
        self.snapshot = Some(snapshot.clone());

        match snapshot.status {
            TaskStatus::Pending | TaskStatus::Processing => {
                debug!(
                    "Task {} is {} (stage: {}, overall {:.1}%)",
                    task_id,
                    snapshot.status,
                    snapshot.stage.as_ref().map(|s| s.as_str()).unwrap_or("-"),
                    self.overall_percent
                );
                Next::PollAfter(self.policy.interval)
            }
            TaskStatus::Completed => {
                debug!("Task {} completed", task_id);
                self.overall_percent = 100.0;
                self.state = LifecycleState::Completed { task_id, snapshot };
                Next::Stop
            }
            TaskStatus::Failed => {
                let message = snapshot.failure_message();
                debug!("Task {} failed: {}", task_id, message);
                self.fail(task_id, Failure::Backend(message))
            }
        }
    }

    fn apply_transient_error(&mut self, task_id: TaskId, err: OneVoiceError) -> Next {
        self.transient_failures += 1;

        if self.transient_failures > self.policy.max_network_retries {
            debug!(
                "Giving up on task {} after {} consecutive failures: {}",
                task_id, self.transient_failures, err
            );
            let failure = Failure::Unreachable {
                attempts: self.transient_failures,
                last_error: err.to_string(),
            };
            return self.fail(task_id, failure);
        }

        let delay = self.policy.retry.next_delay(self.transient_failures);
        debug!(
            "Status poll for {} failed ({}), retry {}/{} in {:?}",
            task_id, err, self.transient_failures, self.policy.max_network_retries, delay
        );
        Next::PollAfter(delay)
    }

    fn fail(&mut self, task_id: TaskId, failure: Failure) -> Next {
        self.state = LifecycleState::Failed { task_id, failure };
        Next::Stop
    }
}
